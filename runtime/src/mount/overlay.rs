//! overlayfs mount driver.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use strata_core::{Result, StrataError};

use super::driver::{check_lowers, MountDriver};

/// Kernel overlayfs driver. Requires root.
///
/// The work directory and the placeholder lower used for an empty stack
/// live next to `upper` (`<upper>.work`, `<upper>.empty`), so removing the
/// directory that holds `upper` cleans them up too.
#[derive(Debug, Default)]
pub struct OverlayDriver;

impl OverlayDriver {
    pub fn new() -> Self {
        Self
    }

    fn sibling(upper: &Path, suffix: &str) -> PathBuf {
        let mut name = upper.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        upper.with_file_name(name)
    }
}

impl MountDriver for OverlayDriver {
    fn mount(&self, target: &Path, upper: &Path, lowers: &[PathBuf]) -> Result<()> {
        check_lowers(lowers)?;

        let work = Self::sibling(upper, ".work");
        for dir in [target, upper, work.as_path()] {
            std::fs::create_dir_all(dir)?;
        }

        // overlayfs lists the topmost lower first
        let mut lower_dirs: Vec<PathBuf> = lowers.iter().rev().cloned().collect();
        if lower_dirs.is_empty() {
            let empty = Self::sibling(upper, ".empty");
            std::fs::create_dir_all(&empty)?;
            lower_dirs.push(empty);
        }
        let lowerdir = lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            lowerdir,
            upper.display(),
            work.display()
        );

        mount(
            Some("overlay"),
            target,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| {
            StrataError::MountError(format!(
                "Failed to mount overlay at {}: {}",
                target.display(),
                e
            ))
        })?;

        tracing::debug!(
            target = %target.display(),
            upper = %upper.display(),
            lowers = lowers.len(),
            "Mounted overlay"
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        match umount2(target, MntFlags::MNT_DETACH) {
            Ok(()) => {
                tracing::debug!(target = %target.display(), "Unmounted overlay");
                Ok(())
            }
            // Not mounted, or already gone
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(StrataError::MountError(format!(
                "Failed to unmount {}: {}",
                target.display(),
                e
            ))),
        }
    }

    fn sync(&self, _target: &Path) -> Result<()> {
        nix::unistd::sync();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "overlay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_paths() {
        let upper = Path::new("/tmp/strata/mount-1/upper");
        assert_eq!(
            OverlayDriver::sibling(upper, ".work"),
            PathBuf::from("/tmp/strata/mount-1/upper.work")
        );
    }

    #[test]
    fn test_mount_missing_lower_fails_before_mounting() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = OverlayDriver::new().mount(
            &tmp.path().join("target"),
            &tmp.path().join("upper"),
            &[tmp.path().join("missing")],
        );
        assert!(matches!(result, Err(StrataError::IoError(_))));
        assert!(!tmp.path().join("target").exists());
    }
}
