//! Directive handlers that touch the mounted root filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use strata_core::{Result, StrataError};

use crate::cache::resolve_sources;
use crate::fs::copy_entry;

/// Environment variable pointing RUN/CMD at the build's rootfs view.
pub const ROOTFS_ENV: &str = "STRATA_ROOTFS";

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Resolve a COPY destination against the mount root.
///
/// `.`, `./`, `/` and `/.` mean the root itself; anything else is joined
/// onto the root as given, with a leading `/` treated as root-relative.
pub fn resolve_copy_dest(root: &Path, dst: &str) -> PathBuf {
    match dst {
        "." | "./" | "/" | "/." => root.to_path_buf(),
        other => root.join(other.trim_start_matches('/')),
    }
}

/// Copy the sources selected by `src` into the destination directory.
///
/// Each match keeps its base name under the destination; directories are
/// copied recursively.
pub fn copy_sources(context_dir: &Path, src: &str, root: &Path, dst: &str) -> Result<()> {
    let sources = resolve_sources(context_dir, src)?;
    let dest_dir = resolve_copy_dest(root, dst);
    std::fs::create_dir_all(&dest_dir).map_err(|e| {
        StrataError::Other(format!(
            "Failed to create destination {}: {}",
            dest_dir.display(),
            e
        ))
    })?;

    for source in &sources {
        let name = source.file_name().ok_or_else(|| {
            StrataError::ValidationError(format!("Cannot copy {}", source.display()))
        })?;
        copy_entry(source, &dest_dir.join(name))?;
    }

    tracing::debug!(
        src = %src,
        dest = %dest_dir.display(),
        count = sources.len(),
        "Copied sources"
    );
    Ok(())
}

/// Run a shell command with `cwd` as working directory.
///
/// `env` is layered over the inherited environment. A non-zero exit fails
/// with the command's stderr.
pub fn run_shell(command: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Result<()> {
    std::fs::create_dir_all(cwd)?;

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    if std::env::var_os("PATH").is_none() {
        cmd.env("PATH", DEFAULT_PATH);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd
        .output()
        .map_err(|e| StrataError::Other(format!("Failed to execute command: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::info!(output = %stdout.trim_end(), "Command output");
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StrataError::Other(format!(
            "command exited with {}: {}",
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr.trim()
        )));
    }
    Ok(())
}
