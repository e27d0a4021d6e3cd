//! Canonical content hashing.
//!
//! Streams a directory (or single file) as a normalized tar archive into a
//! SHA256 hasher. Entries are sorted by relative path and headers carry no
//! timestamps or ownership, so identical trees hash identically regardless
//! of traversal order, mtimes or the filesystem they came from.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use strata_core::{Digest, Result, StrataError};

/// Media type recorded for layer content.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

/// Digest of a canonical tar stream plus its length in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDigest {
    pub digest: Digest,
    pub size: u64,
}

/// `io::Write` sink that hashes and counts everything written to it.
struct HashWriter {
    hasher: Sha256,
    written: u64,
}

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compute the canonical digest of the content at `path`.
///
/// A directory is archived without its root entry; a regular file is
/// archived as a single entry named by its base name.
pub fn canonical_digest(path: &Path) -> Result<CanonicalDigest> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        StrataError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to stat {}: {}", path.display(), e),
        ))
    })?;

    let writer = HashWriter {
        hasher: Sha256::new(),
        written: 0,
    };
    let mut builder = tar::Builder::new(writer);

    if metadata.is_dir() {
        let mut entries = Vec::new();
        collect_entries(path, path, &mut entries)?;
        entries.sort();
        for relative in &entries {
            append_entry(&mut builder, &path.join(relative), relative)?;
        }
    } else {
        let name = path.file_name().map(PathBuf::from).ok_or_else(|| {
            StrataError::ValidationError(format!("Cannot hash path {}", path.display()))
        })?;
        append_entry(&mut builder, path, &name)?;
    }

    let writer = builder.into_inner().map_err(|e| {
        StrataError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to finalize canonical tar: {}", e),
        ))
    })?;

    Ok(CanonicalDigest {
        digest: Digest::from_hasher(writer.hasher),
        size: writer.written,
    })
}

/// Whether a directory has no entries at all.
pub fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut read_dir = std::fs::read_dir(path).map_err(|e| {
        StrataError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to read directory {}: {}", path.display(), e),
        ))
    })?;
    Ok(read_dir.next().is_none())
}

/// Recursively collect paths relative to `root`.
fn collect_entries(root: &Path, current: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| StrataError::Other(format!("Failed to strip prefix: {}", e)))?
            .to_path_buf();

        let is_dir = entry.file_type()?.is_dir();
        entries.push(relative);
        if is_dir {
            collect_entries(root, &path, entries)?;
        }
    }
    Ok(())
}

/// Append one filesystem object with a normalized header.
fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    full_path: &Path,
    relative: &Path,
) -> Result<()> {
    let metadata = std::fs::symlink_metadata(full_path)?;
    let file_type = metadata.file_type();

    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(metadata.permissions().mode() & 0o7777);

    if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, relative, io::empty())?;
    } else if file_type.is_file() {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        let file = File::open(full_path)?;
        builder.append_data(&mut header, relative, file)?;
    } else if file_type.is_symlink() {
        let target = std::fs::read_link(full_path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, relative, &target)?;
    } else if is_char_device(&metadata) {
        // overlayfs whiteouts are 0:0 character devices
        let rdev = metadata.rdev();
        header.set_entry_type(tar::EntryType::Char);
        header.set_size(0);
        header.set_device_major(dev_major(rdev))?;
        header.set_device_minor(dev_minor(rdev))?;
        builder.append_data(&mut header, relative, io::empty())?;
    } else {
        tracing::debug!(path = %full_path.display(), "Skipping special file in canonical digest");
    }

    Ok(())
}

fn is_char_device(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_char_device()
}

fn dev_major(dev: u64) -> u32 {
    (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)) as u32
}

fn dev_minor(dev: u64) -> u32 {
    ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32
}
