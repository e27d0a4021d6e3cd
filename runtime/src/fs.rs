//! Filesystem helpers shared by the layer store, mount drivers and
//! source staging.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use strata_core::{Result, StrataError};

/// Overlay xattr marking a directory whose lower content is hidden.
pub const OVERLAY_OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// Recursively copy `src` into `dst`, merging with whatever is already there.
///
/// Symlinks are recreated rather than followed, permission bits are kept and
/// character devices (overlay whiteouts) are recreated with their device
/// number. Extended attributes are copied where the filesystem allows it.
/// Existing files at the destination are replaced.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| {
        io_context(e, format!("Failed to create directory {}", dst.display()))
    })?;
    let mode = std::fs::metadata(src)?.permissions().mode();
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode))?;
    preserve_xattrs(src, dst);

    let read_dir = std::fs::read_dir(src)
        .map_err(|e| io_context(e, format!("Failed to read directory {}", src.display())))?;

    for entry in read_dir {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        copy_entry(&src_path, &dst_path)?;
    }

    Ok(())
}

/// Copy a single filesystem object (file, symlink, character device or
/// directory tree).
pub fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    let file_type = std::fs::symlink_metadata(src)
        .map_err(|e| io_context(e, format!("Failed to stat {}", src.display())))?
        .file_type();

    if file_type.is_dir() {
        if dst.symlink_metadata().map(|m| !m.is_dir()).unwrap_or(false) {
            remove_path(dst)?;
        }
        copy_dir_recursive(src, dst)
    } else if file_type.is_symlink() {
        let target = std::fs::read_link(src)?;
        if dst.symlink_metadata().is_ok() {
            remove_path(dst)?;
        }
        std::os::unix::fs::symlink(&target, dst).map_err(|e| {
            io_context(e, format!("Failed to create symlink {}", dst.display()))
        })?;
        Ok(())
    } else if file_type.is_file() {
        if dst.symlink_metadata().map(|m| !m.is_file()).unwrap_or(false) {
            remove_path(dst)?;
        }
        std::fs::copy(src, dst).map_err(|e| {
            io_context(
                e,
                format!("Failed to copy {} to {}", src.display(), dst.display()),
            )
        })?;
        preserve_xattrs(src, dst);
        Ok(())
    } else if file_type.is_char_device() {
        if dst.symlink_metadata().is_ok() {
            remove_path(dst)?;
        }
        copy_char_device(src, dst)?;
        preserve_xattrs(src, dst);
        Ok(())
    } else {
        tracing::debug!(path = %src.display(), "Skipping special file during copy");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn copy_char_device(src: &Path, dst: &Path) -> Result<()> {
    use nix::sys::stat::{mknod, Mode, SFlag};
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::symlink_metadata(src)?;
    let mode = metadata.permissions().mode() & 0o7777;
    mknod(
        dst,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(mode as libc::mode_t),
        metadata.rdev() as libc::dev_t,
    )
    .map_err(|e| {
        io_context(
            io::Error::from(e),
            format!("Failed to create device node {}", dst.display()),
        )
    })?;
    // mknod is subject to the umask
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn copy_char_device(src: &Path, _dst: &Path) -> Result<()> {
    tracing::debug!(path = %src.display(), "Skipping character device during copy");
    Ok(())
}

/// Copy extended attributes, logging instead of failing where the
/// destination filesystem or privileges do not allow it.
fn preserve_xattrs(src: &Path, dst: &Path) {
    if let Err(e) = copy_xattrs(src, dst) {
        tracing::warn!(
            src = %src.display(),
            dst = %dst.display(),
            error = %e,
            "Failed to copy extended attributes"
        );
    }
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Remove every entry inside `dir`, keeping the directory itself.
pub fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        remove_path(&entry?.path())?;
    }
    Ok(())
}

/// Copy extended attributes from `src` to `dst` without following symlinks.
#[cfg(target_os = "linux")]
pub fn copy_xattrs(src: &Path, dst: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let to_cstring = |p: &Path| {
        CString::new(p.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    };
    let src_c = to_cstring(src)?;
    let dst_c = to_cstring(dst)?;

    // SAFETY: a null buffer with size 0 asks for the required length.
    let len = unsafe { libc::llistxattr(src_c.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    if len == 0 {
        return Ok(());
    }

    let mut names = vec![0u8; len as usize];
    // SAFETY: `names` has exactly `len` bytes of writable storage.
    let len = unsafe {
        libc::llistxattr(
            src_c.as_ptr(),
            names.as_mut_ptr() as *mut libc::c_char,
            names.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    names.truncate(len as usize);

    for name in names.split(|b| *b == 0).filter(|n| !n.is_empty()) {
        let name_c = CString::new(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: size query as above.
        let size = unsafe {
            libc::lgetxattr(src_c.as_ptr(), name_c.as_ptr(), std::ptr::null_mut(), 0)
        };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut value = vec![0u8; size as usize];
        // SAFETY: `value` has `size` bytes of writable storage.
        let size = unsafe {
            libc::lgetxattr(
                src_c.as_ptr(),
                name_c.as_ptr(),
                value.as_mut_ptr() as *mut libc::c_void,
                value.len(),
            )
        };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: pointers are valid for the given lengths.
        let rc = unsafe {
            libc::lsetxattr(
                dst_c.as_ptr(),
                name_c.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                size as usize,
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn copy_xattrs(_src: &Path, _dst: &Path) -> io::Result<()> {
    Ok(())
}

/// Value of one extended attribute, `None` if it is not set.
#[cfg(target_os = "linux")]
pub fn read_xattr(path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path_c = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let name_c =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: size query with a null buffer.
    let size = unsafe { libc::lgetxattr(path_c.as_ptr(), name_c.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENODATA) | Some(libc::ENOTSUP) => Ok(None),
            _ => Err(err),
        };
    }
    let mut value = vec![0u8; size as usize];
    // SAFETY: `value` has `size` bytes of writable storage.
    let size = unsafe {
        libc::lgetxattr(
            path_c.as_ptr(),
            name_c.as_ptr(),
            value.as_mut_ptr() as *mut libc::c_void,
            value.len(),
        )
    };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    value.truncate(size as usize);
    Ok(Some(value))
}

#[cfg(not(target_os = "linux"))]
pub fn read_xattr(_path: &Path, _name: &str) -> io::Result<Option<Vec<u8>>> {
    Ok(None)
}

/// Whether overlayfs marked `dir` as opaque.
pub fn is_overlay_opaque(dir: &Path) -> bool {
    matches!(read_xattr(dir, OVERLAY_OPAQUE_XATTR), Ok(Some(v)) if v == b"y")
}

fn io_context(e: io::Error, context: String) -> StrataError {
    StrataError::IoError(io::Error::new(e.kind(), format!("{}: {}", context, e)))
}
