//! Build cache.
//!
//! - `chain`: cumulative chain ids over ordered layer sequences
//! - `prober`: persistent cache records and hit/miss decisions
//! - `source`: input digests (COPY sources, literal arguments)

pub mod chain;
pub mod prober;
pub mod source;

pub use chain::{chain_id, chain_of};
pub use prober::{CacheLayer, CacheRecord, CacheStore, Prober};
pub use source::{input_digest, resolve_sources, source_digest, ShellScope};
