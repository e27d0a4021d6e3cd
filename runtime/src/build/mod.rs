//! Image build pipeline.
//!
//! [`BuildImage`] resolves the base, drives the [`Executor`] over the new
//! directives, validates the result with the differs and persists the
//! assembled image.

mod builder;
mod context;
mod differ;
mod executor;
mod handlers;

pub use builder::BuildImage;
pub use context::ExecContext;
pub use differ::{
    default_differs, run_differs, Differ, MetadataDiffer, MountView, ShadowDiffer,
    CLUSTERFILE_PATH,
};
pub use executor::Executor;
pub use handlers::{copy_sources, resolve_copy_dest, run_shell, ROOTFS_ENV};
