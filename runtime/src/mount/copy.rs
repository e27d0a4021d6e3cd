//! Copy-based mount driver.
//!
//! Materialises the lower stack into the target directory and tracks writes
//! by diffing against a snapshot taken at mount time. Works without root
//! and on any Unix filesystem, at the cost of copying every lower layer.

use std::collections::HashMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use strata_core::{Result, StrataError};

use super::driver::{check_lowers, MountDriver};
use super::snapshot::{DirSnapshot, EntryKind};
use crate::fs::{clear_dir, copy_entry, is_overlay_opaque, remove_path};

/// Prefix marking a deleted entry inside a layer directory.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker making a directory hide everything below it in lower layers.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

struct CopyMount {
    upper: PathBuf,
    base: DirSnapshot,
}

/// Unprivileged driver that emulates a layered mount by copying.
#[derive(Default)]
pub struct CopyDriver {
    mounts: Mutex<HashMap<PathBuf, CopyMount>>,
}

impl CopyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite `upper` as the diff between the mount-time snapshot and now.
    fn write_upper(target: &Path, mount: &CopyMount) -> Result<()> {
        let current = DirSnapshot::capture(target)?;
        let diff = mount.base.diff(&current);

        std::fs::create_dir_all(&mount.upper)?;
        clear_dir(&mount.upper)?;

        for relative in &diff.changed {
            let src = target.join(relative);
            let dst = mount.upper.join(relative);
            ensure_parents(target, &mount.upper, relative)?;
            if current.entries.get(relative).map(|e| e.kind) == Some(EntryKind::Dir) {
                create_dir_like(&src, &dst)?;
            } else {
                copy_entry(&src, &dst)?;
            }
        }

        for relative in &diff.removed {
            let name = match relative.file_name() {
                Some(name) => name.to_string_lossy(),
                None => continue,
            };
            ensure_parents(target, &mount.upper, relative)?;
            let whiteout = mount
                .upper
                .join(relative)
                .with_file_name(format!("{}{}", WHITEOUT_PREFIX, name));
            std::fs::write(&whiteout, b"")?;
        }

        tracing::debug!(
            target = %target.display(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "Synced copy mount"
        );
        Ok(())
    }
}

impl MountDriver for CopyDriver {
    fn mount(&self, target: &Path, upper: &Path, lowers: &[PathBuf]) -> Result<()> {
        check_lowers(lowers)?;

        let mut mounts = self.mounts.lock();
        if mounts.contains_key(target) {
            return Err(StrataError::MountError(format!(
                "{} is already mounted",
                target.display()
            )));
        }

        std::fs::create_dir_all(target)?;
        std::fs::create_dir_all(upper)?;
        clear_dir(target)?;
        for lower in lowers {
            apply_layer(lower, target)?;
        }

        let base = DirSnapshot::capture(target)?;
        mounts.insert(
            target.to_path_buf(),
            CopyMount {
                upper: upper.to_path_buf(),
                base,
            },
        );

        tracing::debug!(
            target = %target.display(),
            upper = %upper.display(),
            lowers = lowers.len(),
            "Mounted copy view"
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mount = match self.mounts.lock().remove(target) {
            Some(m) => m,
            None => return Ok(()),
        };

        let synced = if target.is_dir() {
            Self::write_upper(target, &mount)
        } else {
            Ok(())
        };
        clear_dir(target)?;
        synced
    }

    fn sync(&self, target: &Path) -> Result<()> {
        let mounts = self.mounts.lock();
        let mount = mounts.get(target).ok_or_else(|| {
            StrataError::MountError(format!("{} is not mounted", target.display()))
        })?;
        Self::write_upper(target, mount)
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Apply one layer directory on top of `target`, honouring both `.wh.`
/// markers and overlayfs whiteout devices and opaque xattrs.
pub fn apply_layer(layer: &Path, target: &Path) -> Result<()> {
    if layer.join(OPAQUE_WHITEOUT).exists() || is_overlay_opaque(layer) {
        clear_dir(target)?;
    }

    for entry in std::fs::read_dir(layer)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let src = entry.path();
        let dst = target.join(&name);

        if name_str == OPAQUE_WHITEOUT {
            continue;
        }
        if let Some(hidden) = name_str.strip_prefix(WHITEOUT_PREFIX) {
            remove_path(&target.join(hidden))?;
            continue;
        }

        let metadata = std::fs::symlink_metadata(&src)?;
        if is_overlay_whiteout(&metadata) {
            remove_path(&dst)?;
        } else if metadata.is_dir() {
            if dst.symlink_metadata().map(|m| !m.is_dir()).unwrap_or(false) {
                remove_path(&dst)?;
            }
            create_dir_like(&src, &dst)?;
            apply_layer(&src, &dst)?;
        } else {
            copy_entry(&src, &dst)?;
        }
    }
    Ok(())
}

/// overlayfs records deletions as 0:0 character devices.
fn is_overlay_whiteout(metadata: &std::fs::Metadata) -> bool {
    metadata.file_type().is_char_device() && metadata.rdev() == 0
}

fn create_dir_like(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    let mode = std::fs::metadata(src)?.permissions().mode();
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Create the parent directories of `relative` inside `upper`, copying
/// permissions from the matching directories in `target`.
fn ensure_parents(target: &Path, upper: &Path, relative: &Path) -> Result<()> {
    let mut prefix = PathBuf::new();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            prefix.push(component);
            let dst = upper.join(&prefix);
            if !dst.exists() {
                let src = target.join(&prefix);
                if src.is_dir() {
                    create_dir_like(&src, &dst)?;
                } else {
                    std::fs::create_dir_all(&dst)?;
                }
            }
        }
    }
    Ok(())
}
