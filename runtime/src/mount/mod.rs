//! Layered mounts: drivers that stack layer directories into one writable
//! view, and [`MountTarget`] which owns a mounted view for its lifetime.

mod copy;
mod driver;
#[cfg(target_os = "linux")]
mod overlay;
mod snapshot;
mod target;

pub use copy::{apply_layer, CopyDriver, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
pub use driver::{driver_for, MountDriver};
#[cfg(target_os = "linux")]
pub use overlay::OverlayDriver;
pub use snapshot::{DirSnapshot, EntryKind, FileEntry, SnapshotDiff};
pub use target::MountTarget;
