//! Image resolution.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{Result, StrataError, MAX_LAYER_DEPTH};

use super::ImageStore;
use crate::image::{Image, Layer};

/// Resolves base image references before a build stacks on top of them.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Make `name` available locally, fetching it if needed.
    async fn pull_if_not_exist(&self, name: &str) -> Result<()>;

    /// Load a locally available image by name.
    async fn get_image_by_name(&self, name: &str) -> Result<Image>;
}

/// Image service backed only by the local image store.
///
/// There is no remote transport: an image that was never built or saved
/// locally is reported as not found.
pub struct LocalImageService {
    store: Arc<ImageStore>,
}

impl LocalImageService {
    pub fn new(store: Arc<ImageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ImageService for LocalImageService {
    async fn pull_if_not_exist(&self, name: &str) -> Result<()> {
        self.store.get_by_name(name).await.map(|_| ())
    }

    async fn get_image_by_name(&self, name: &str) -> Result<Image> {
        self.store.get_by_name(name).await
    }
}

/// Every content layer of `image`, bottom-most first.
///
/// Images saved without their base only list their own layers; the base is
/// then resolved through the FROM reference, recursively.
pub async fn resolve_all_layers(service: &dyn ImageService, image: &Image) -> Result<Vec<Layer>> {
    let mut chain: Vec<Vec<Layer>> = Vec::new();
    let mut current = image.clone();
    let mut depth = 0;

    loop {
        let own = current.content_layers().to_vec();
        depth += own.len();
        if depth > MAX_LAYER_DEPTH {
            return Err(StrataError::DepthExceeded {
                depth,
                max: MAX_LAYER_DEPTH,
            });
        }
        chain.push(own);

        if !current.spec.without_base || current.is_scratch_based() {
            break;
        }
        let base_name = match current.base_reference() {
            Some(name) => name.to_string(),
            None => break,
        };
        service.pull_if_not_exist(&base_name).await?;
        current = service.get_image_by_name(&base_name).await?;
    }

    Ok(chain.into_iter().rev().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageSpec, LayerKind, SCRATCH};
    use strata_core::Digest;
    use tempfile::TempDir;

    fn layer(kind: LayerKind, value: &str) -> Layer {
        let mut layer = Layer::new(kind, value);
        layer.id = Some(Digest::from_bytes(value.as_bytes()));
        layer
    }

    fn image(from: &str, values: &[&str], without_base: bool) -> Image {
        let mut layers = vec![Layer::new(LayerKind::From, from)];
        layers.extend(values.iter().map(|v| layer(LayerKind::Copy, v)));
        Image {
            name: String::new(),
            id: None,
            spec: ImageSpec {
                layers,
                without_base,
                ..Default::default()
            },
        }
    }

    fn service(tmp: &TempDir) -> (Arc<ImageStore>, LocalImageService) {
        let store = Arc::new(ImageStore::open(tmp.path()).unwrap());
        (store.clone(), LocalImageService::new(store))
    }

    #[tokio::test]
    async fn test_local_service_not_found() {
        let tmp = TempDir::new().unwrap();
        let (_, svc) = service(&tmp);
        assert!(svc.pull_if_not_exist("nope:v1").await.unwrap_err().is_not_found());
        assert!(svc.get_image_by_name("nope:v1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_full_image() {
        let tmp = TempDir::new().unwrap();
        let (_, svc) = service(&tmp);
        let img = image("base:v1", &["a", "b"], false);

        let layers = resolve_all_layers(&svc, &img).await.unwrap();
        let values: Vec<&str> = layers.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_resolve_without_base_recurses() {
        let tmp = TempDir::new().unwrap();
        let (store, svc) = service(&tmp);
        store
            .save(&image(SCRATCH, &["k8s"], false), "base:v1")
            .await
            .unwrap();
        store
            .save(&image("base:v1", &["app"], true), "mid:v1")
            .await
            .unwrap();

        let top = image("mid:v1", &["top"], true);
        let layers = resolve_all_layers(&svc, &top).await.unwrap();
        let values: Vec<&str> = layers.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["k8s", "app", "top"]);
    }

    #[tokio::test]
    async fn test_resolve_missing_base() {
        let tmp = TempDir::new().unwrap();
        let (_, svc) = service(&tmp);
        let img = image("ghost:v1", &["a"], true);
        assert!(resolve_all_layers(&svc, &img).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_depth_exceeded() {
        let tmp = TempDir::new().unwrap();
        let (_, svc) = service(&tmp);
        let names: Vec<String> = (0..=MAX_LAYER_DEPTH).map(|i| format!("l{i}")).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let img = image(SCRATCH, &refs, false);

        assert!(matches!(
            resolve_all_layers(&svc, &img).await,
            Err(StrataError::DepthExceeded { .. })
        ));
    }
}
