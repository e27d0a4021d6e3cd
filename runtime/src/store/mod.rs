//! Persistence: content-addressed layers, image metadata and image resolution.

mod image_store;
mod layer_store;
mod service;

pub use image_store::{ImageStore, StoredImage};
pub use layer_store::LayerStore;
pub use service::{resolve_all_layers, ImageService, LocalImageService};
