//! Image metadata: layers, specs, typed directives and the Kubefile parser.

mod instruction;
mod kubefile;
mod types;

pub use instruction::Instruction;
pub use kubefile::Kubefile;
pub use types::{
    Descriptor, Image, ImageSpec, Layer, LayerKind, CLUSTERFILE_ANNOTATION,
    LABEL_ANNOTATION_PREFIX, ROOTFS_LAYER_VALUE, SCRATCH,
};
