//! Per-step execution context.

use std::collections::BTreeMap;

use strata_core::Digest;

use crate::cache::{chain_id, chain_of};

/// State threaded from one directive to the next.
///
/// Each step receives the context by value and returns the updated one;
/// nothing else carries state between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Chain id of `base_layers`
    pub parent_chain: Option<Digest>,
    /// Whether every step so far hit the cache
    pub continue_cache: bool,
    /// Layer ids visible to the next step, bottom-most first
    pub base_layers: Vec<Digest>,
    /// Accumulated `ENV` values
    pub env: BTreeMap<String, String>,
    /// Current `WORKDIR`, relative to the mount root
    pub workdir: Option<String>,
    /// Accumulated `LABEL` values
    pub labels: BTreeMap<String, String>,
}

impl ExecContext {
    /// Context for the first new directive on top of `base_layers`.
    pub fn new(base_layers: Vec<Digest>, use_cache: bool) -> Self {
        Self {
            parent_chain: chain_of(&base_layers),
            continue_cache: use_cache,
            base_layers,
            ..Default::default()
        }
    }

    /// Append a produced layer.
    ///
    /// The chain always advances. A miss ends the cache lineage for the rest
    /// of the build.
    pub fn with_layer(mut self, id: Digest, cache_hit: bool) -> Self {
        self.parent_chain = Some(chain_id(self.parent_chain.as_ref(), &id));
        self.base_layers.push(id);
        self.continue_cache &= cache_hit;
        self
    }

    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.env.insert(key, value);
        self
    }

    pub fn with_label(mut self, key: String, value: String) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// Set the working directory. Relative paths extend the current one.
    pub fn with_workdir(mut self, path: &str) -> Self {
        let next = if path.starts_with('/') {
            path.trim_start_matches('/').to_string()
        } else {
            match self.workdir.as_deref() {
                Some(current) if !current.is_empty() => format!("{}/{}", current, path),
                _ => path.to_string(),
            }
        };
        self.workdir = Some(next.trim_end_matches('/').to_string());
        self
    }
}
