//! Content-addressed layer store.
//!
//! Layer content lives under `layers/<hex>/` and a descriptor for each
//! layer under `layerdb/<hex>.json`. Identical content always maps to the
//! same directory, so registering it again is a no-op.

use std::path::{Path, PathBuf};

use strata_core::{Digest, Result, StrataConfig, StrataError};

use crate::fs::copy_dir_recursive;
use crate::hash::{canonical_digest, LAYER_MEDIA_TYPE};
use crate::image::Descriptor;

/// Content-addressed store for layer directories.
#[derive(Debug, Clone)]
pub struct LayerStore {
    /// Root for layer content (one directory per hex digest)
    layer_dir: PathBuf,
    /// Root for layer descriptors
    layerdb_dir: PathBuf,
}

impl LayerStore {
    /// Open the store under the configured root, creating directories as needed.
    pub fn new(config: &StrataConfig) -> Result<Self> {
        let layer_dir = config.layer_dir();
        let layerdb_dir = config.layerdb_dir();
        for dir in [&layer_dir, &layerdb_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                StrataError::StoreError(format!(
                    "Failed to create layer store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            layer_dir,
            layerdb_dir,
        })
    }

    /// Register the content at `path` and return its content id.
    ///
    /// The content is copied into a staging directory next to the layer root
    /// and renamed into place. If the layer already exists, or another
    /// registration of the same content wins the rename, nothing is stored.
    pub fn register_layer(&self, path: &Path) -> Result<Digest> {
        let canonical = canonical_digest(path)?;
        let digest = canonical.digest;
        let target = self.layer_path(&digest);

        if target.is_dir() {
            tracing::debug!(layer = %digest, "Layer already registered");
            self.write_descriptor(&digest, canonical.size)?;
            return Ok(digest);
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.layer_dir)
            .map_err(|e| {
                StrataError::StoreError(format!("Failed to create staging directory: {}", e))
            })?;

        let metadata = std::fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            copy_dir_recursive(path, staging.path())?;
        } else if let Some(name) = path.file_name() {
            crate::fs::copy_entry(path, &staging.path().join(name))?;
        }

        match std::fs::rename(staging.path(), &target) {
            Ok(()) => {}
            Err(_) if target.is_dir() => {
                tracing::debug!(layer = %digest, "Concurrent registration already stored layer");
            }
            Err(e) => {
                return Err(StrataError::StoreError(format!(
                    "Failed to move layer into {}: {}",
                    target.display(),
                    e
                )))
            }
        }

        self.write_descriptor(&digest, canonical.size)?;

        tracing::info!(
            layer = %digest,
            size_bytes = canonical.size,
            path = %target.display(),
            "Registered layer"
        );

        Ok(digest)
    }

    /// Descriptor of a registered layer.
    pub fn stat(&self, id: &Digest) -> Result<Descriptor> {
        let path = self.descriptor_path(id);
        if !path.is_file() || !self.exists(id) {
            return Err(StrataError::not_found("layer", id.as_str()));
        }
        let data = std::fs::read_to_string(&path).map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to read layer descriptor {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// All registered layer descriptors, sorted by digest.
    pub fn list(&self) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        for entry in std::fs::read_dir(&self.layerdb_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            match serde_json::from_str::<Descriptor>(&content) {
                Ok(d) => descriptors.push(d),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid layer descriptor")
                }
            }
        }
        descriptors.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(descriptors)
    }

    /// On-disk directory for a layer id.
    pub fn layer_path(&self, id: &Digest) -> PathBuf {
        self.layer_dir.join(id.hex())
    }

    /// Whether a layer's content directory exists.
    pub fn exists(&self, id: &Digest) -> bool {
        self.layer_path(id).is_dir()
    }

    /// Layer directories for the given ids, bottom-most first.
    ///
    /// Fails if any layer is missing from the store.
    pub fn layer_paths(&self, ids: &[Digest]) -> Result<Vec<PathBuf>> {
        ids.iter()
            .map(|id| {
                if self.exists(id) {
                    Ok(self.layer_path(id))
                } else {
                    Err(StrataError::not_found("layer", id.as_str()))
                }
            })
            .collect()
    }

    fn descriptor_path(&self, id: &Digest) -> PathBuf {
        self.layerdb_dir.join(format!("{}.json", id.hex()))
    }

    fn write_descriptor(&self, digest: &Digest, size: u64) -> Result<()> {
        let path = self.descriptor_path(digest);
        if path.is_file() {
            return Ok(());
        }
        let descriptor = Descriptor {
            digest: digest.clone(),
            size,
            media_type: LAYER_MEDIA_TYPE.to_string(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&descriptor)?).map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to write layer descriptor {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }
}
