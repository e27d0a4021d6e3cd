//! Scoped mount ownership.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::{Result, StrataError};
use tempfile::TempDir;

use super::driver::MountDriver;

/// A mounted view plus the temporary directories backing it.
///
/// Holds `target/` and `upper/` inside one temp directory. The view is
/// unmounted and the directories removed when the value is dropped, so
/// every exit path of the owner releases it.
pub struct MountTarget {
    driver: Arc<dyn MountDriver>,
    dir: Option<TempDir>,
    target: PathBuf,
    upper: PathBuf,
    mounted: bool,
}

impl MountTarget {
    /// Create temp directories under `tmp_root` and mount `lowers`
    /// (bottom-most first) at the new target.
    pub fn new(driver: Arc<dyn MountDriver>, tmp_root: &Path, lowers: &[PathBuf]) -> Result<Self> {
        std::fs::create_dir_all(tmp_root)?;
        let dir = tempfile::Builder::new()
            .prefix("mount-")
            .tempdir_in(tmp_root)
            .map_err(|e| {
                StrataError::MountError(format!(
                    "Failed to create mount directory under {}: {}",
                    tmp_root.display(),
                    e
                ))
            })?;
        let target = dir.path().join("target");
        let upper = dir.path().join("upper");
        std::fs::create_dir_all(&target)?;
        std::fs::create_dir_all(&upper)?;

        let mut mount = Self {
            driver,
            dir: Some(dir),
            target,
            upper,
            mounted: false,
        };

        mount
            .driver
            .mount(&mount.target, &mount.upper, lowers)
            .map_err(|e| {
                // A partial mount must not outlive the failed call
                if let Err(err) = mount.driver.unmount(&mount.target) {
                    tracing::warn!(target = %mount.target.display(), error = %err, "Failed to release partial mount");
                }
                e
            })?;
        mount.mounted = true;
        Ok(mount)
    }

    /// Merged view.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Writable diff directory.
    pub fn upper(&self) -> &Path {
        &self.upper
    }

    /// Flush pending writes into the upper directory.
    pub fn sync(&self) -> Result<()> {
        if self.mounted {
            self.driver.sync(&self.target)?;
        }
        Ok(())
    }

    /// Release the view but keep the upper directory for inspection.
    pub fn unmount(&mut self) -> Result<()> {
        if self.mounted {
            self.mounted = false;
            self.driver.unmount(&self.target)?;
        }
        Ok(())
    }

    /// Unmount and remove all temporary directories, reporting failures.
    pub fn cleanup(mut self) -> Result<()> {
        self.unmount()?;
        if let Some(dir) = self.dir.take() {
            dir.close().map_err(|e| {
                StrataError::MountError(format!("Failed to remove mount directory: {}", e))
            })?;
        }
        Ok(())
    }
}

impl Drop for MountTarget {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            tracing::warn!(target = %self.target.display(), error = %e, "Failed to unmount on drop");
        }
        // TempDir removes the directories when dropped after this
    }
}
