//! Directory snapshots for the copy-based mount driver.
//!
//! A snapshot records every entry under a root with its type, permission
//! bits and a content fingerprint, so two snapshots can be diffed into the
//! set of added/changed and removed paths.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use strata_core::{Result, StrataError};

/// Type of a snapshotted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Other,
}

/// Metadata for a single entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub kind: EntryKind,
    /// Permission bits
    pub mode: u32,
    /// File size in bytes
    pub size: u64,
    /// SHA256 of file content or symlink target; empty for directories
    pub fingerprint: String,
}

/// Paths that differ between two snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Added or modified paths, sorted so parents precede children
    pub changed: Vec<PathBuf>,
    /// Removed paths; descendants of a removed directory are omitted
    pub removed: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all entries and their content.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Compute the diff between this snapshot (before) and another (after).
    pub fn diff(&self, after: &DirSnapshot) -> SnapshotDiff {
        let mut changed: Vec<PathBuf> = after
            .entries
            .iter()
            .filter(|(path, entry)| self.entries.get(*path) != Some(*entry))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|path| !after.entries.contains_key(*path))
            .filter(|path| {
                !path
                    .ancestors()
                    .skip(1)
                    .any(|a| self.entries.contains_key(a) && !after.entries.contains_key(a))
            })
            .cloned()
            .collect();

        // Sort for deterministic output
        changed.sort();
        removed.sort();
        SnapshotDiff { changed, removed }
    }
}

/// Recursively walk a directory and collect entries.
fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        StrataError::MountError(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                StrataError::MountError(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let metadata = std::fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();
        let (kind, fingerprint) = if file_type.is_dir() {
            (EntryKind::Dir, String::new())
        } else if file_type.is_file() {
            (EntryKind::File, hash_file(&path)?)
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path)?;
            (
                EntryKind::Symlink,
                hex::encode(Sha256::digest(target.as_os_str().as_bytes())),
            )
        } else {
            (EntryKind::Other, String::new())
        };

        entries.insert(
            relative,
            FileEntry {
                kind,
                mode: metadata.permissions().mode() & 0o7777,
                size: if kind == EntryKind::Dir { 0 } else { metadata.len() },
                fingerprint,
            },
        );

        if kind == EntryKind::Dir {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_capture() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("etc")).unwrap();
        fs::write(tmp.path().join("etc/hosts"), "localhost").unwrap();

        let snap = DirSnapshot::capture(tmp.path()).unwrap();
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(snap.entries[Path::new("etc")].kind, EntryKind::Dir);
        assert_eq!(snap.entries[Path::new("etc/hosts")].size, 9);
    }

    #[test]
    fn test_diff_added_and_modified() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "one").unwrap();
        fs::write(tmp.path().join("b"), "same").unwrap();
        let before = DirSnapshot::capture(tmp.path()).unwrap();

        // Same size, different content: caught by the fingerprint
        fs::write(tmp.path().join("a"), "two").unwrap();
        fs::write(tmp.path().join("c"), "new").unwrap();
        let after = DirSnapshot::capture(tmp.path()).unwrap();

        let diff = before.diff(&after);
        assert_eq!(diff.changed, vec![PathBuf::from("a"), PathBuf::from("c")]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_diff_mode_change() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("run.sh"), "#!/bin/sh").unwrap();
        let before = DirSnapshot::capture(tmp.path()).unwrap();

        fs::set_permissions(tmp.path().join("run.sh"), fs::Permissions::from_mode(0o700)).unwrap();
        let after = DirSnapshot::capture(tmp.path()).unwrap();
        assert_eq!(before.diff(&after).changed, vec![PathBuf::from("run.sh")]);
    }

    #[test]
    fn test_diff_removed_collapses_to_top() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("opt/app")).unwrap();
        fs::write(tmp.path().join("opt/app/bin"), "x").unwrap();
        fs::write(tmp.path().join("keep"), "x").unwrap();
        let before = DirSnapshot::capture(tmp.path()).unwrap();

        fs::remove_dir_all(tmp.path().join("opt")).unwrap();
        let after = DirSnapshot::capture(tmp.path()).unwrap();

        let diff = before.diff(&after);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.removed, vec![PathBuf::from("opt")]);
    }

    #[test]
    fn test_diff_identical() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "x").unwrap();
        let snap = DirSnapshot::capture(tmp.path()).unwrap();
        assert!(snap.diff(&snap.clone()).is_empty());
    }
}
