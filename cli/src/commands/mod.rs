//! CLI command definitions and dispatch.

mod build;
mod images;
mod inspect;
mod rmi;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use strata_core::StrataConfig;
use strata_runtime::ImageStore;

/// Strata: layered image builder.
#[derive(Parser)]
#[command(name = "strata", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an image from a Kubefile
    Build(build::BuildArgs),
    /// List built images
    Images(images::ImagesArgs),
    /// Display image metadata as JSON
    Inspect(inspect::InspectArgs),
    /// Remove one or more images
    Rmi(rmi::RmiArgs),
}

/// Load the configuration file if given, defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<StrataConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => StrataConfig::load(path)?,
        None => StrataConfig::from_env(),
    };
    Ok(config)
}

/// Open the image store under the configured root.
pub(crate) fn open_image_store(
    config: &StrataConfig,
) -> Result<Arc<ImageStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(ImageStore::new(config)?))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(
    command: Command,
    config: &StrataConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Build(args) => build::execute(args, config).await,
        Command::Images(args) => images::execute(args, config).await,
        Command::Inspect(args) => inspect::execute(args, config).await,
        Command::Rmi(args) => rmi::execute(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from([
            "strata", "-v", "build", "-f", "Kubefile.app", "-t", "app:v1", "--mode", "lite",
            "--no-cache", "ctx",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Command::Build(_)));
    }

    #[test]
    fn test_build_requires_tag() {
        assert!(Cli::try_parse_from(["strata", "build", "."]).is_err());
    }

    #[test]
    fn test_parse_rmi_multiple() {
        let cli = Cli::try_parse_from(["strata", "rmi", "a:v1", "b:v1"]).unwrap();
        match cli.command {
            Command::Rmi(args) => assert_eq!(args.images.len(), 2),
            _ => panic!("expected rmi"),
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "root_dir: /srv/strata\nmount_driver: copy\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.mount_driver, strata_core::MountDriverKind::Copy);
    }
}
