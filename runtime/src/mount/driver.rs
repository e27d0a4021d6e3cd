//! Mount driver abstraction and selection.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::{MountDriverKind, Result, StrataError};

use super::copy::CopyDriver;

/// Stacks layer directories into one writable view.
///
/// `lowers` are ordered bottom-most first. All writes made under `target`
/// must end up in `upper` once [`sync`](MountDriver::sync) or
/// [`unmount`](MountDriver::unmount) returns.
pub trait MountDriver: Send + Sync {
    /// Build the layered view at `target`.
    fn mount(&self, target: &Path, upper: &Path, lowers: &[PathBuf]) -> Result<()>;

    /// Release the view at `target`. Safe to call when nothing is mounted.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Flush pending writes so `upper` reflects the current view.
    fn sync(&self, target: &Path) -> Result<()>;

    /// Driver name for logs.
    fn name(&self) -> &'static str;
}

/// Pick a driver for the configured kind.
///
/// `Auto` selects overlayfs when running as root on Linux and the copy
/// driver otherwise.
pub fn driver_for(kind: MountDriverKind) -> Result<Arc<dyn MountDriver>> {
    match kind {
        MountDriverKind::Copy => Ok(Arc::new(CopyDriver::new())),
        MountDriverKind::Overlay => overlay_driver(),
        MountDriverKind::Auto => {
            if overlay_supported() {
                overlay_driver()
            } else {
                tracing::debug!("overlayfs unavailable, using copy mount driver");
                Ok(Arc::new(CopyDriver::new()))
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn overlay_driver() -> Result<Arc<dyn MountDriver>> {
    Ok(Arc::new(super::overlay::OverlayDriver::new()))
}

#[cfg(not(target_os = "linux"))]
fn overlay_driver() -> Result<Arc<dyn MountDriver>> {
    Err(StrataError::MountError(
        "overlay mount driver is only available on Linux".to_string(),
    ))
}

fn overlay_supported() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    cfg!(target_os = "linux") && unsafe { libc::geteuid() } == 0
}

/// Fail with an I/O not-found error unless every lower directory exists.
pub(crate) fn check_lowers(lowers: &[PathBuf]) -> Result<()> {
    for lower in lowers {
        if !lower.is_dir() {
            return Err(StrataError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("lower layer directory {} does not exist", lower.display()),
            )));
        }
    }
    Ok(())
}
