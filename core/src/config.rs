use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, StrataError};

/// Environment variable overriding the storage root.
pub const ROOT_ENV: &str = "STRATA_ROOT";

/// Maximum number of layers (base + new) an image may stack.
pub const MAX_LAYER_DEPTH: usize = 128;

/// Strata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Storage root holding layers, images, cache records and scratch space
    pub root_dir: PathBuf,

    /// Which mount driver stacks layers during a build
    pub mount_driver: MountDriverKind,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            root_dir: dirs::home_dir()
                .map(|h| h.join(".strata"))
                .unwrap_or_else(|| PathBuf::from(".strata")),
            mount_driver: MountDriverKind::Auto,
            log_level: LogLevel::Warn,
        }
    }
}

impl StrataConfig {
    /// Configuration rooted at an explicit directory.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults, with `STRATA_ROOT` applied if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a YAML configuration file; `STRATA_ROOT` still wins over the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::ConfigError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: StrataConfig = serde_yaml::from_str(&content).map_err(|e| {
            StrataError::ConfigError(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(root) = std::env::var_os(ROOT_ENV) {
            if !root.is_empty() {
                self.root_dir = PathBuf::from(root);
            }
        }
    }

    /// Layer root: one directory per layer, named by hex digest.
    pub fn layer_dir(&self) -> PathBuf {
        self.root_dir.join("layers")
    }

    /// Layer descriptor metadata.
    pub fn layerdb_dir(&self) -> PathBuf {
        self.root_dir.join("layerdb")
    }

    /// Image metadata index.
    pub fn image_dir(&self) -> PathBuf {
        self.root_dir.join("images")
    }

    /// Build cache records.
    pub fn cache_dir(&self) -> PathBuf {
        self.root_dir.join("cache")
    }

    /// Scratch space for mount targets, upper dirs and staging copies.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root_dir.join("tmp")
    }
}

/// Build mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Execute every directive, including runtime commands
    #[default]
    Cloud,
    /// Skip runtime-command directives that have no filesystem effect
    Lite,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Lite => write!(f, "lite"),
        }
    }
}

impl FromStr for BuildMode {
    type Err = StrataError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cloud" => Ok(Self::Cloud),
            "lite" => Ok(Self::Lite),
            _ => Err(StrataError::ConfigError(format!(
                "unknown build mode: '{}' (supported: cloud, lite)",
                s
            ))),
        }
    }
}

/// Mount driver selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountDriverKind {
    /// Overlay when running as root on Linux, copy otherwise
    #[default]
    Auto,
    /// Kernel overlayfs
    Overlay,
    /// Portable copy-based stacking
    Copy,
}

impl FromStr for MountDriverKind {
    type Err = StrataError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "overlay" => Ok(Self::Overlay),
            "copy" => Ok(Self::Copy),
            _ => Err(StrataError::ConfigError(format!(
                "unknown mount driver: '{}' (supported: auto, overlay, copy)",
                s
            ))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing-subscriber`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Options controlling the directive loop.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Build context that copy sources resolve against
    pub context_dir: PathBuf,
    /// Build mode
    pub mode: BuildMode,
    /// Probe the build cache before executing directives
    pub use_cache: bool,
}

impl BuildOptions {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            mode: BuildMode::Cloud,
            use_cache: true,
        }
    }
}

/// Options controlling how a finished build is persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Record only the new layers; base layers are resolved through FROM
    pub without_base: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let config = StrataConfig::with_root("/var/lib/strata");
        assert_eq!(config.layer_dir(), PathBuf::from("/var/lib/strata/layers"));
        assert_eq!(config.layerdb_dir(), PathBuf::from("/var/lib/strata/layerdb"));
        assert_eq!(config.image_dir(), PathBuf::from("/var/lib/strata/images"));
        assert_eq!(config.cache_dir(), PathBuf::from("/var/lib/strata/cache"));
        assert_eq!(config.tmp_dir(), PathBuf::from("/var/lib/strata/tmp"));
    }

    #[test]
    fn test_default_driver_is_auto() {
        let config = StrataConfig::with_root("/tmp/x");
        assert_eq!(config.mount_driver, MountDriverKind::Auto);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_build_mode_parse() {
        assert_eq!("lite".parse::<BuildMode>().unwrap(), BuildMode::Lite);
        assert_eq!("cloud".parse::<BuildMode>().unwrap(), BuildMode::Cloud);
        assert!("fast".parse::<BuildMode>().is_err());
        assert_eq!(BuildMode::Lite.to_string(), "lite");
    }

    #[test]
    fn test_mount_driver_parse() {
        assert_eq!(
            "overlay".parse::<MountDriverKind>().unwrap(),
            MountDriverKind::Overlay
        );
        assert!("aufs".parse::<MountDriverKind>().is_err());
    }

    #[test]
    fn test_load_yaml_partial() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("strata.yaml");
        std::fs::write(&path, "mount_driver: copy\nlog_level: debug\n").unwrap();

        let config = StrataConfig::load(&path).unwrap();
        assert_eq!(config.mount_driver, MountDriverKind::Copy);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("strata.yaml");
        std::fs::write(&path, "mount_driver: [").unwrap();
        assert!(matches!(
            StrataConfig::load(&path),
            Err(StrataError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(StrataConfig::load(Path::new("/nonexistent/strata.yaml")).is_err());
    }

    #[test]
    fn test_build_options_defaults() {
        let opts = BuildOptions::new("/ctx");
        assert_eq!(opts.mode, BuildMode::Cloud);
        assert!(opts.use_cache);
        assert!(!SaveOptions::default().without_base);
    }
}
