//! Layer and image metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_core::{Digest, Result, StrataError};

/// `FROM` value meaning "empty base".
pub const SCRATCH: &str = "scratch";

/// Value recorded on the trailing rootfs diff layer.
pub const ROOTFS_LAYER_VALUE: &str = "rootfs cache";

/// Image annotation carrying the merged cluster descriptor.
pub const CLUSTERFILE_ANNOTATION: &str = "strata.io/clusterfile";

/// Prefix for annotations produced by `LABEL` directives.
pub const LABEL_ANNOTATION_PREFIX: &str = "label.";

/// Directive kind of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerKind {
    From,
    Copy,
    Run,
    Cmd,
    Env,
    Label,
    Workdir,
    /// Captured root filesystem diff appended at save time
    Base,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::From => "FROM",
            Self::Copy => "COPY",
            Self::Run => "RUN",
            Self::Cmd => "CMD",
            Self::Env => "ENV",
            Self::Label => "LABEL",
            Self::Workdir => "WORKDIR",
            Self::Base => "BASE",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = StrataError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FROM" => Ok(Self::From),
            "COPY" => Ok(Self::Copy),
            "RUN" => Ok(Self::Run),
            "CMD" => Ok(Self::Cmd),
            "ENV" => Ok(Self::Env),
            "LABEL" => Ok(Self::Label),
            "WORKDIR" => Ok(Self::Workdir),
            "BASE" => Ok(Self::Base),
            _ => Err(StrataError::ValidationError(format!(
                "Unknown layer type '{}'",
                s
            ))),
        }
    }
}

/// One directive plus the content digest of the filesystem delta it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Digest>,
}

impl Layer {
    pub fn new(kind: LayerKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            id: None,
        }
    }

    /// Set the content id. Once set, only the same id may be assigned again.
    pub fn assign_id(&mut self, id: Digest) -> Result<()> {
        match &self.id {
            Some(existing) if *existing != id => Err(StrataError::ValidationError(format!(
                "layer {} {} already has id {}, refusing {}",
                self.kind, self.value, existing, id
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)
    }
}

/// Metadata for an opaque content blob in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
}

/// Image specification: ordered layers plus annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Base layers were left out; resolve them through the FROM reference
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub without_base: bool,
}

/// A named image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Digest>,
    pub spec: ImageSpec,
}

impl Image {
    /// The empty base image a `FROM scratch` build starts from.
    pub fn scratch() -> Self {
        Self::default()
    }

    /// Value of the leading FROM layer, if any.
    pub fn base_reference(&self) -> Option<&str> {
        self.spec
            .layers
            .first()
            .filter(|l| l.kind == LayerKind::From)
            .map(|l| l.value.as_str())
    }

    /// Whether the image builds on the empty base.
    pub fn is_scratch_based(&self) -> bool {
        matches!(self.base_reference(), None | Some(SCRATCH))
    }

    /// Layers after the FROM reference.
    pub fn content_layers(&self) -> &[Layer] {
        match self.base_reference() {
            Some(_) => &self.spec.layers[1..],
            None => &self.spec.layers,
        }
    }

    /// Content-derived id over the full resolved spec.
    ///
    /// The name and any previously assigned id are not part of the digest.
    pub fn compute_id(&self) -> Result<Digest> {
        let bytes = serde_json::to_vec(&self.spec)?;
        Ok(Digest::from_bytes(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(s: &str) -> Digest {
        Digest::from_bytes(s.as_bytes())
    }

    #[test]
    fn test_layer_kind_parse_case_insensitive() {
        assert_eq!("copy".parse::<LayerKind>().unwrap(), LayerKind::Copy);
        assert_eq!("WorkDir".parse::<LayerKind>().unwrap(), LayerKind::Workdir);
        assert!("ADD".parse::<LayerKind>().is_err());
    }

    #[test]
    fn test_layer_serializes_type_field() {
        let layer = Layer::new(LayerKind::Run, "echo hi");
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["type"], "RUN");
        assert_eq!(json["value"], "echo hi");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_assign_id_is_write_once() {
        let mut layer = Layer::new(LayerKind::Copy, "a .");
        layer.assign_id(digest("one")).unwrap();
        // same id again is fine
        layer.assign_id(digest("one")).unwrap();
        assert!(layer.assign_id(digest("two")).is_err());
        assert_eq!(layer.id, Some(digest("one")));
    }

    #[test]
    fn test_base_reference_and_content_layers() {
        let image = Image {
            name: "app:v1".to_string(),
            id: None,
            spec: ImageSpec {
                layers: vec![
                    Layer::new(LayerKind::From, "kubernetes:v1.22"),
                    Layer::new(LayerKind::Copy, "a ."),
                ],
                ..Default::default()
            },
        };
        assert_eq!(image.base_reference(), Some("kubernetes:v1.22"));
        assert!(!image.is_scratch_based());
        assert_eq!(image.content_layers().len(), 1);
    }

    #[test]
    fn test_scratch_image() {
        let image = Image::scratch();
        assert!(image.is_scratch_based());
        assert!(image.content_layers().is_empty());
    }

    #[test]
    fn test_compute_id_ignores_name_and_id() {
        let mut a = Image::scratch();
        a.spec.layers.push(Layer::new(LayerKind::From, SCRATCH));
        let mut b = a.clone();
        b.name = "other".to_string();
        b.id = Some(digest("stale"));
        assert_eq!(a.compute_id().unwrap(), b.compute_id().unwrap());
    }

    #[test]
    fn test_compute_id_tracks_layer_order() {
        let mut a = Image::scratch();
        a.spec.layers = vec![
            Layer::new(LayerKind::Run, "one"),
            Layer::new(LayerKind::Run, "two"),
        ];
        let mut b = a.clone();
        b.spec.layers.reverse();
        assert_ne!(a.compute_id().unwrap(), b.compute_id().unwrap());
    }
}
