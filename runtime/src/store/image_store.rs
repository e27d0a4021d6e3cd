//! Image metadata store.
//!
//! Keeps saved images in an in-memory index backed by a persistent
//! `index.json` under the image directory. Layer content is owned by the
//! [`LayerStore`](super::LayerStore); this store only records metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{Result, StrataConfig, StrataError};
use tokio::sync::RwLock;

use crate::image::Image;

/// A saved image plus bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Image metadata; `image.id` is always set for stored images
    pub image: Image,
    /// When the image was saved
    pub saved_at: DateTime<Utc>,
    /// When the image was last resolved
    pub last_used: DateTime<Utc>,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Name-keyed image metadata store.
pub struct ImageStore {
    /// Root directory for image metadata
    store_dir: PathBuf,
    /// In-memory index: name → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl ImageStore {
    /// Open the store under the configured root.
    ///
    /// Creates the directory if it doesn't exist and loads any existing
    /// index from disk.
    pub fn new(config: &StrataConfig) -> Result<Self> {
        Self::open(&config.image_dir())
    }

    /// Open a store rooted at an explicit directory.
    pub fn open(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Persist `image` under `name`, assigning its content-derived id.
    ///
    /// The id is computed over the full resolved spec, so the same layers and
    /// annotations always give the same id. Saving an existing name replaces it.
    pub async fn save(&self, image: &Image, name: &str) -> Result<Image> {
        let mut image = image.clone();
        image.name = name.to_string();
        let id = image.compute_id()?;
        image.id = Some(id.clone());

        let now = Utc::now();
        let stored = StoredImage {
            image: image.clone(),
            saved_at: now,
            last_used: now,
        };

        let mut index = self.index.write().await;
        index.insert(name.to_string(), stored);
        drop(index);

        self.save_index().await?;

        tracing::info!(
            image = %name,
            id = %id,
            layers = image.spec.layers.len(),
            "Saved image"
        );

        Ok(image)
    }

    /// Look up an image by name.
    pub async fn get_by_name(&self, name: &str) -> Result<Image> {
        let mut index = self.index.write().await;
        match index.get_mut(name) {
            Some(stored) => {
                stored.last_used = Utc::now();
                let image = stored.image.clone();
                drop(index);
                // Best-effort save of updated last_used
                if let Err(e) = self.save_index().await {
                    tracing::warn!(error = %e, "Failed to persist image index");
                }
                Ok(image)
            }
            None => Err(StrataError::not_found("image", name)),
        }
    }

    /// All stored images, sorted by name.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<StoredImage> = index.values().cloned().collect();
        images.sort_by(|a, b| a.image.name.cmp(&b.image.name));
        images
    }

    /// Remove an image by name. Layer content is left in the layer store.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut index = self.index.write().await;
        if index.remove(name).is_none() {
            return Err(StrataError::not_found("image", name));
        }
        drop(index);
        self.save_index().await
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    async fn save_index(&self) -> Result<()> {
        let index = self.index.read().await;
        let store_index = StoreIndex {
            images: index.values().cloned().collect(),
        };
        drop(index);

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            StrataError::StoreError(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        StrataError::StoreError(format!(
            "Failed to read image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        StrataError::StoreError(format!("Failed to parse image store index: {}", e))
    })?;

    Ok(store_index
        .images
        .into_iter()
        .map(|stored| (stored.image.name.clone(), stored))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Layer, LayerKind, SCRATCH};
    use tempfile::TempDir;

    fn test_image() -> Image {
        let mut image = Image::scratch();
        image.spec.layers = vec![
            Layer::new(LayerKind::From, SCRATCH),
            Layer::new(LayerKind::Run, "echo hi"),
        ];
        image
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("images");
        let store = ImageStore::open(&store_dir).unwrap();
        assert!(store_dir.exists());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = ImageStore::open(tmp.path()).unwrap();

        let saved = store.save(&test_image(), "app:v1").await.unwrap();
        assert_eq!(saved.name, "app:v1");
        assert_eq!(saved.id, Some(test_image().compute_id().unwrap()));

        let fetched = store.get_by_name("app:v1").await.unwrap();
        assert_eq!(fetched, saved);
    }

    #[tokio::test]
    async fn test_same_spec_same_id_across_names() {
        let tmp = TempDir::new().unwrap();
        let store = ImageStore::open(tmp.path()).unwrap();

        let a = store.save(&test_image(), "a:v1").await.unwrap();
        let b = store.save(&test_image(), "b:v1").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = ImageStore::open(tmp.path()).unwrap();
        assert!(store.get_by_name("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let store = ImageStore::open(tmp.path()).unwrap();
        store.save(&test_image(), "app:v1").await.unwrap();

        store.remove("app:v1").await.unwrap();
        assert!(store.get_by_name("app:v1").await.is_err());
        assert!(store.remove("app:v1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = ImageStore::open(tmp.path()).unwrap();
        store.save(&test_image(), "zeta:v1").await.unwrap();
        store.save(&test_image(), "alpha:v1").await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .into_iter()
            .map(|s| s.image.name)
            .collect();
        assert_eq!(names, vec!["alpha:v1", "zeta:v1"]);
    }

    #[tokio::test]
    async fn test_index_persistence() {
        let tmp = TempDir::new().unwrap();

        let id = {
            let store = ImageStore::open(tmp.path()).unwrap();
            store.save(&test_image(), "app:v1").await.unwrap().id
        };

        // A new store from the same directory loads the persisted index
        let store = ImageStore::open(tmp.path()).unwrap();
        let image = store.get_by_name("app:v1").await.unwrap();
        assert_eq!(image.id, id);
    }

    #[tokio::test]
    async fn test_corrupted_index() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("index.json"), "{not json").unwrap();
        assert!(ImageStore::open(tmp.path()).is_err());
    }
}
