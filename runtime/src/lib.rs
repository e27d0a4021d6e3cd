//! Strata Runtime - layered image build engine.
//!
//! Canonical content hashing, the layer and image stores, layered mounts,
//! the build cache, the directive executor and the image assembler.

#![allow(clippy::result_large_err)]

pub mod build;
pub mod cache;
pub mod fs;
pub mod hash;
pub mod image;
pub mod mount;
pub mod store;

// Re-export common types
pub use build::{BuildImage, Differ, ExecContext, Executor, MountView};
pub use cache::{chain_id, chain_of, CacheStore, Prober};
pub use hash::{canonical_digest, CanonicalDigest, LAYER_MEDIA_TYPE};
pub use image::{Descriptor, Image, ImageSpec, Instruction, Kubefile, Layer, LayerKind};
pub use mount::{driver_for, CopyDriver, MountDriver, MountTarget};
pub use store::{ImageService, ImageStore, LayerStore, LocalImageService, StoredImage};

/// Strata Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
