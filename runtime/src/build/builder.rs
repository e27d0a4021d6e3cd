//! Build driver: resolves the base, runs the directive loop and assembles
//! the finished image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::{
    BuildOptions, Digest, Result, SaveOptions, StrataConfig, StrataError, MAX_LAYER_DEPTH,
};

use super::differ::{default_differs, run_differs, Differ, MountView, CLUSTERFILE_PATH};
use super::executor::Executor;
use crate::cache::CacheStore;
use crate::hash::is_empty_dir;
use crate::image::{
    Image, ImageSpec, Layer, LayerKind, CLUSTERFILE_ANNOTATION, LABEL_ANNOTATION_PREFIX,
    ROOTFS_LAYER_VALUE,
};
use crate::mount::{MountDriver, MountTarget};
use crate::store::{resolve_all_layers, ImageService, ImageStore, LayerStore};

/// One build of an image on top of its resolved base.
///
/// Owns the build-wide rootfs mount for its whole lifetime. The mount is
/// released by [`BuildImage::cleanup`] or, failing that, on drop.
pub struct BuildImage {
    from: Layer,
    base_image: Image,
    base_layers: Vec<Layer>,
    new_layers: Vec<Layer>,
    labels: BTreeMap<String, String>,
    layers: LayerStore,
    cache: CacheStore,
    images: Arc<ImageStore>,
    driver: Arc<dyn MountDriver>,
    differs: Vec<Arc<dyn Differ>>,
    tmp_dir: PathBuf,
    rootfs: Option<MountTarget>,
}

impl BuildImage {
    /// Resolve the base of `raw` and mount it as the build's rootfs.
    ///
    /// `raw` is the unbuilt image: a FROM layer followed by the new layers.
    /// The depth limit is checked before anything is mounted.
    pub async fn new(
        config: &StrataConfig,
        raw: Image,
        driver: Arc<dyn MountDriver>,
        images: Arc<ImageStore>,
        service: &dyn ImageService,
    ) -> Result<Self> {
        let from = match raw.spec.layers.first() {
            Some(layer) if layer.kind == LayerKind::From => layer.clone(),
            _ => {
                return Err(StrataError::ValidationError(
                    "image must start with a FROM layer".to_string(),
                ))
            }
        };
        let new_layers = raw.content_layers().to_vec();

        let (base_image, base_layers) = if raw.is_scratch_based() {
            (Image::scratch(), Vec::new())
        } else {
            service.pull_if_not_exist(&from.value).await?;
            let base = service.get_image_by_name(&from.value).await?;
            let layers = resolve_all_layers(service, &base).await?;
            (base, layers)
        };

        let depth = base_layers.len() + new_layers.len();
        if depth > MAX_LAYER_DEPTH {
            return Err(StrataError::DepthExceeded {
                depth,
                max: MAX_LAYER_DEPTH,
            });
        }

        let layers = LayerStore::new(config)?;
        let cache = CacheStore::new(config)?;
        let tmp_dir = config.tmp_dir();

        let lowers = layers.layer_paths(&layer_ids(&base_layers))?;
        let rootfs = MountTarget::new(driver.clone(), &tmp_dir, &lowers)?;
        tracing::info!(
            base = %from.value,
            base_layers = base_layers.len(),
            new_layers = new_layers.len(),
            rootfs = %rootfs.target().display(),
            driver = driver.name(),
            "Prepared build"
        );

        Ok(Self {
            from,
            base_image,
            base_layers,
            new_layers,
            labels: BTreeMap::new(),
            layers,
            cache,
            images,
            driver,
            differs: default_differs(),
            tmp_dir,
            rootfs: Some(rootfs),
        })
    }

    /// Replace the differ set run at save time.
    pub fn with_differs(mut self, differs: Vec<Arc<dyn Differ>>) -> Self {
        self.differs = differs;
        self
    }

    /// Layers of the resolved base, bottom-most first.
    pub fn base_layers(&self) -> &[Layer] {
        &self.base_layers
    }

    /// New layers, with ids assigned once built.
    pub fn new_layers(&self) -> &[Layer] {
        &self.new_layers
    }

    /// Target of the build-wide rootfs mount.
    pub fn rootfs_path(&self) -> Option<&Path> {
        self.rootfs.as_ref().map(|m| m.target())
    }

    /// Run every new directive in order.
    pub fn exec_build(&mut self, options: &BuildOptions) -> Result<()> {
        let rootfs = self.rootfs_path().map(Path::to_path_buf).ok_or_else(|| {
            StrataError::MountError("build rootfs is no longer mounted".to_string())
        })?;

        let executor = Executor {
            layers: &self.layers,
            cache: &self.cache,
            driver: self.driver.clone(),
            tmp_dir: &self.tmp_dir,
            options,
            rootfs: &rootfs,
        };
        let ctx = executor.execute(&mut self.new_layers, layer_ids(&self.base_layers))?;
        self.labels = ctx.labels;
        Ok(())
    }

    /// Validate, assemble and persist the built image under `name`.
    ///
    /// Nothing is persisted when a differ fails.
    pub async fn save_build_image(&mut self, name: &str, options: SaveOptions) -> Result<Image> {
        let rootfs = self.rootfs.as_mut().ok_or_else(|| {
            StrataError::MountError("build rootfs is no longer mounted".to_string())
        })?;
        rootfs.sync()?;
        let rootfs_view = MountView::new(rootfs.target(), rootfs.upper());

        let new_ids = layer_ids(&self.new_layers);
        let lowers = self.layers.layer_paths(&new_ids)?;
        let finished = MountTarget::new(self.driver.clone(), &self.tmp_dir, &lowers)?;
        let finished_view = MountView::new(finished.target(), finished.upper());

        run_differs(&self.differs, &finished_view, &rootfs_view).await?;
        let clusterfile = merge_clusterfile(&self.base_image, &rootfs_view, &finished_view, name)?;
        finished.cleanup()?;

        let mut layers = vec![self.from.clone()];
        if !options.without_base {
            layers.extend(self.base_layers.iter().cloned());
        }
        layers.extend(self.new_layers.iter().cloned());

        rootfs.unmount()?;
        if is_empty_dir(rootfs.upper())? {
            tracing::warn!(image = %name, "Rootfs diff is empty, no rootfs layer added");
        } else {
            let id = self.layers.register_layer(rootfs.upper())?;
            let mut layer = Layer::new(LayerKind::Base, ROOTFS_LAYER_VALUE);
            layer.assign_id(id)?;
            layers.push(layer);
        }

        let mut annotations = self.base_image.spec.annotations.clone();
        for (key, value) in &self.labels {
            annotations.insert(format!("{}{}", LABEL_ANNOTATION_PREFIX, key), value.clone());
        }
        if let Some(descriptor) = clusterfile {
            annotations.insert(CLUSTERFILE_ANNOTATION.to_string(), descriptor);
        }

        let image = Image {
            name: name.to_string(),
            id: None,
            spec: ImageSpec {
                layers,
                annotations,
                without_base: options.without_base,
            },
        };
        self.images.save(&image, name).await
    }

    /// Unmount the rootfs and remove every temporary directory.
    pub fn cleanup(&mut self) -> Result<()> {
        match self.rootfs.take() {
            Some(rootfs) => rootfs.cleanup(),
            None => Ok(()),
        }
    }

    /// Execute, save and clean up; cleanup runs on every path.
    pub async fn build(mut self, options: &BuildOptions, name: &str, save: SaveOptions) -> Result<Image> {
        let result = match self.exec_build(options) {
            Ok(()) => self.save_build_image(name, save).await,
            Err(e) => Err(e),
        };
        let cleaned = self.cleanup();
        let image = result?;
        cleaned?;
        Ok(image)
    }
}

/// Ids of the layers that carry content, in order.
fn layer_ids(layers: &[Layer]) -> Vec<Digest> {
    layers.iter().filter_map(|l| l.id.clone()).collect()
}

/// Find the cluster descriptor and point it at the new image.
///
/// Looked up in the base image annotation first, then in the rootfs view,
/// then in the view of the new layers.
fn merge_clusterfile(
    base: &Image,
    rootfs: &MountView,
    finished: &MountView,
    name: &str,
) -> Result<Option<String>> {
    let content = match base.spec.annotations.get(CLUSTERFILE_ANNOTATION) {
        Some(content) => Some(content.clone()),
        None => match read_clusterfile(&rootfs.target)? {
            Some(content) => Some(content),
            None => read_clusterfile(&finished.target)?,
        },
    };
    let Some(content) = content else {
        tracing::debug!("No cluster descriptor found");
        return Ok(None);
    };

    let mut doc: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let root = doc.as_mapping_mut().ok_or_else(|| {
        StrataError::ValidationError("cluster descriptor is not a mapping".to_string())
    })?;
    if !root.get("spec").map_or(false, serde_yaml::Value::is_mapping) {
        root.insert(
            serde_yaml::Value::from("spec"),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        );
    }
    if let Some(spec) = root.get_mut("spec").and_then(serde_yaml::Value::as_mapping_mut) {
        spec.insert(
            serde_yaml::Value::from("image"),
            serde_yaml::Value::from(name),
        );
    }

    Ok(Some(serde_yaml::to_string(&doc)?))
}

fn read_clusterfile(root: &Path) -> Result<Option<String>> {
    let path = root.join(CLUSTERFILE_PATH);
    if path.is_file() {
        Ok(Some(std::fs::read_to_string(path)?))
    } else {
        Ok(None)
    }
}
