//! Build cache: records which layer a directive produced on top of a given
//! chain, and probes those records before executing a directive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_core::{Digest, Result, StrataConfig, StrataError};

use super::chain::chain_id;
use crate::image::{Layer, LayerKind};
use crate::store::LayerStore;

/// A candidate layer plus the digest of its build inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayer {
    pub kind: LayerKind,
    pub value: String,
    pub content_digest: Digest,
}

impl CacheLayer {
    pub fn new(layer: &Layer, content_digest: Digest) -> Self {
        Self {
            kind: layer.kind,
            value: layer.value.clone(),
            content_digest,
        }
    }

    /// Cache key of the directive itself, independent of its position.
    pub fn cache_id(&self) -> Result<Digest> {
        #[derive(Serialize)]
        struct Key<'a> {
            kind: LayerKind,
            value: &'a str,
            content_digest: &'a Digest,
        }
        let bytes = serde_json::to_vec(&Key {
            kind: self.kind,
            value: &self.value,
            content_digest: &self.content_digest,
        })?;
        Ok(Digest::from_bytes(&bytes))
    }
}

/// A stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Layer the directive produced
    pub layer_id: Digest,
    /// When the record was written (Unix timestamp)
    pub created_at: i64,
}

/// Persistent map from `chain(parent, cacheID)` to layer id.
///
/// Records live in `records.json` under the cache directory.
pub struct CacheStore {
    path: PathBuf,
    records: Mutex<HashMap<Digest, CacheRecord>>,
}

impl CacheStore {
    pub fn new(config: &StrataConfig) -> Result<Self> {
        Self::open(&config.cache_dir())
    }

    /// Open the record file under `cache_dir`, creating the directory.
    pub fn open(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;
        let path = cache_dir.join("records.json");

        let records = if path.is_file() {
            let data = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&data) {
                Ok(records) => records,
                Err(e) => {
                    // A corrupt record file only costs cache hits
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache records");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn get(&self, key: &Digest) -> Option<CacheRecord> {
        self.records.lock().get(key).cloned()
    }

    pub fn insert(&self, key: Digest, layer_id: Digest) -> Result<()> {
        let mut records = self.records.lock();
        records.insert(
            key,
            CacheRecord {
                layer_id,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        let data = serde_json::to_string_pretty(&*records)?;
        std::fs::write(&self.path, data).map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to write cache records {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decides whether a directive's output can be reused.
pub struct Prober<'a> {
    records: &'a CacheStore,
    layers: &'a LayerStore,
}

impl<'a> Prober<'a> {
    pub fn new(records: &'a CacheStore, layers: &'a LayerStore) -> Self {
        Self { records, layers }
    }

    /// Look up the layer built for `layer` on top of `parent`.
    ///
    /// `Ok(None)` is a miss. A record whose layer is no longer in the layer
    /// store is treated as a miss too.
    pub fn probe(&self, parent: Option<&Digest>, layer: &CacheLayer) -> Result<Option<Digest>> {
        let key = chain_id(parent, &layer.cache_id()?);
        match self.records.get(&key) {
            Some(record) if self.layers.exists(&record.layer_id) => Ok(Some(record.layer_id)),
            Some(record) => {
                tracing::debug!(layer = %record.layer_id, "Cached layer missing from store");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remember that `layer` on top of `parent` produced `layer_id`.
    pub fn record(&self, parent: Option<&Digest>, layer: &CacheLayer, layer_id: &Digest) -> Result<()> {
        let key = chain_id(parent, &layer.cache_id()?);
        self.records.insert(key, layer_id.clone())
    }
}
