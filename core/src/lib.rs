//! Strata Core - Foundational Types
//!
//! Error taxonomy, configuration and content digests shared by the
//! strata runtime and CLI.

pub mod config;
pub mod digest;
pub mod error;

// Re-export commonly used types
pub use config::{
    BuildMode, BuildOptions, LogLevel, MountDriverKind, SaveOptions, StrataConfig,
    MAX_LAYER_DEPTH,
};
pub use digest::Digest;
pub use error::{Result, StrataError};

/// Strata version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
