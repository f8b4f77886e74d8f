//! Layer and feature definitions.
//!
//! The schema is owned by an external collaborator; this crate only reads it. Layers are looked up
//! by id through a [`LayerRegistry`], which the call site constructs (directly, or from a TOML file
//! via [`crate::config::TomlSchemaProvider`]) and passes to adapters, the diff engine and the merge
//! engine.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    ops::{Deref, DerefMut},
};

use crate::{
    error::CurationError,
    properties::{FeatureValue, LayerId},
};

pub mod registry;

pub use registry::LayerRegistry;

#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum LayerKind {
    Span,
    Relation,
    Chain,
}

impl Display for LayerKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerKindSet(pub EnumSet<LayerKind>);

impl LayerKindSet {
    pub fn all() -> Self {
        LayerKindSet(EnumSet::all())
    }
}

impl Deref for LayerKindSet {
    type Target = EnumSet<LayerKind>;
    fn deref(&self) -> &EnumSet<LayerKind> {
        &self.0
    }
}

impl DerefMut for LayerKindSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<EnumSet<LayerKind>> for LayerKindSet {
    fn from(kinds: EnumSet<LayerKind>) -> Self {
        LayerKindSet(kinds)
    }
}

impl From<LayerKind> for LayerKindSet {
    fn from(kind: LayerKind) -> Self {
        LayerKindSet(kind.into())
    }
}

/// Granularity to which span boundaries are snapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchoringMode {
    #[default]
    Characters,
    SingleToken,
    Tokens,
    Sentences,
}

impl AnchoringMode {
    pub fn is_zero_width_allowed(&self) -> bool {
        matches!(self, AnchoringMode::Characters)
    }
}

/// Which kinds of co-located spans a layer tolerates. Stacking means two instances at exactly the
/// same position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    #[default]
    AnyOverlap,
    OverlapOnly,
    StackingOnly,
    NoOverlap,
}

impl OverlapMode {
    pub fn allows_stacking(&self) -> bool {
        matches!(self, OverlapMode::AnyOverlap | OverlapMode::StackingOnly)
    }

    pub fn allows_overlap(&self) -> bool {
        matches!(self, OverlapMode::AnyOverlap | OverlapMode::OverlapOnly)
    }
}

/// Marks a layer as one of the segmentation grids other layers anchor to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segmentation {
    Token,
    Sentence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Bool,
    Integer,
    Float,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureShape {
    Primitive(PrimitiveType),
    /// `target_layer: None` accepts any annotation as link target.
    Link { target_layer: Option<LayerId> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Single,
    Array,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub shape: FeatureShape,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub link_role_enabled: bool,
    /// Whether the diff engine treats this feature as part of an instance's label.
    #[serde(default = "default_true")]
    pub include_in_diff: bool,
}

impl Feature {
    pub fn primitive<S: Into<String>>(name: S, ty: PrimitiveType) -> Self {
        Feature {
            name: name.into(),
            shape: FeatureShape::Primitive(ty),
            multiplicity: Multiplicity::Single,
            link_role_enabled: false,
            include_in_diff: true,
        }
    }

    pub fn string<S: Into<String>>(name: S) -> Self {
        Feature::primitive(name, PrimitiveType::String)
    }

    /// An array-of-(role, target) link feature.
    pub fn link<S: Into<String>>(name: S, target_layer: Option<LayerId>) -> Self {
        Feature {
            name: name.into(),
            shape: FeatureShape::Link { target_layer },
            multiplicity: Multiplicity::Array,
            link_role_enabled: true,
            include_in_diff: true,
        }
    }

    pub fn with_multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn excluded_from_diff(mut self) -> Self {
        self.include_in_diff = false;
        self
    }

    pub fn is_link(&self) -> bool {
        matches!(self.shape, FeatureShape::Link { .. })
    }

    pub fn link_target_layer(&self) -> Option<LayerId> {
        match self.shape {
            FeatureShape::Link { target_layer } => target_layer,
            FeatureShape::Primitive(_) => None,
        }
    }

    /// Check that `value` has the shape this feature declares. `Null` is always accepted.
    pub fn check_value(&self, value: &FeatureValue) -> Result<(), CurationError> {
        let ok = match (&self.shape, value) {
            (_, FeatureValue::Null) => true,
            (FeatureShape::Primitive(PrimitiveType::Bool), FeatureValue::Bool(_)) => true,
            (FeatureShape::Primitive(PrimitiveType::Integer), FeatureValue::Integer(_)) => true,
            (
                FeatureShape::Primitive(PrimitiveType::Float),
                FeatureValue::Float(_) | FeatureValue::Integer(_),
            ) => true,
            (FeatureShape::Primitive(PrimitiveType::String), FeatureValue::String(_)) => true,
            (FeatureShape::Link { .. }, FeatureValue::Links(links)) => {
                if self.multiplicity == Multiplicity::Single && links.len() > 1 {
                    return Err(CurationError::InvalidFeature(format!(
                        "feature '{}' accepts a single link, got {}",
                        self.name,
                        links.len()
                    )));
                }
                if !self.link_role_enabled && links.iter().any(|l| !l.role.is_empty()) {
                    return Err(CurationError::InvalidFeature(format!(
                        "feature '{}' does not accept link roles",
                        self.name
                    )));
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CurationError::InvalidFeature(format!(
                "value {value:?} does not match shape {:?} of feature '{}'",
                self.shape, self.name
            )))
        }
    }
}

/// The attach-type of a layer: every instance must overlap an instance of `layer`, whose
/// `feature` is pointed at the new instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachSpec {
    pub layer: LayerId,
    pub feature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    #[serde(default)]
    pub anchoring_mode: AnchoringMode,
    #[serde(default)]
    pub attach: Option<AttachSpec>,
    /// Relation layers only. `None` accepts any annotation as endpoint.
    #[serde(default)]
    pub endpoint_layer: Option<LayerId>,
    #[serde(default)]
    pub overlap_mode: OverlapMode,
    #[serde(default = "default_true")]
    pub cross_sentence: bool,
    #[serde(default)]
    pub segmentation: Option<Segmentation>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl Layer {
    fn with_kind<S: Into<String>>(id: LayerId, name: S, kind: LayerKind) -> Self {
        Layer {
            id,
            name: name.into(),
            kind,
            anchoring_mode: AnchoringMode::default(),
            attach: None,
            endpoint_layer: None,
            overlap_mode: OverlapMode::default(),
            cross_sentence: true,
            segmentation: None,
            features: vec![],
        }
    }

    pub fn span<S: Into<String>>(id: LayerId, name: S) -> Self {
        Layer::with_kind(id, name, LayerKind::Span)
    }

    pub fn relation<S: Into<String>>(id: LayerId, name: S, endpoint: Option<LayerId>) -> Self {
        let mut layer = Layer::with_kind(id, name, LayerKind::Relation);
        layer.endpoint_layer = endpoint;
        layer
    }

    pub fn chain<S: Into<String>>(id: LayerId, name: S) -> Self {
        Layer::with_kind(id, name, LayerKind::Chain)
    }

    pub fn token(id: LayerId) -> Self {
        let mut layer = Layer::with_kind(id, "Token", LayerKind::Span);
        layer.segmentation = Some(Segmentation::Token);
        layer.overlap_mode = OverlapMode::NoOverlap;
        layer
    }

    pub fn sentence(id: LayerId) -> Self {
        let mut layer = Layer::with_kind(id, "Sentence", LayerKind::Span);
        layer.segmentation = Some(Segmentation::Sentence);
        layer.overlap_mode = OverlapMode::NoOverlap;
        layer
    }

    pub fn with_anchoring(mut self, mode: AnchoringMode) -> Self {
        self.anchoring_mode = mode;
        self
    }

    pub fn with_overlap(mut self, mode: OverlapMode) -> Self {
        self.overlap_mode = mode;
        self
    }

    pub fn with_attach<S: Into<String>>(mut self, layer: LayerId, feature: S) -> Self {
        self.attach = Some(AttachSpec {
            layer,
            feature: feature.into(),
        });
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn without_cross_sentence(mut self) -> Self {
        self.cross_sentence = false;
        self
    }

    pub fn is_segmentation(&self) -> bool {
        self.segmentation.is_some()
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Position of a feature in the schema; used as the attribute index of a VID.
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn require_feature(&self, name: &str) -> Result<&Feature, CurationError> {
        self.feature(name).ok_or_else(|| {
            CurationError::InvalidFeature(format!(
                "layer '{}' has no feature '{name}'",
                self.name
            ))
        })
    }

    /// Primitive features that contribute to an instance's label.
    pub fn label_features(&self) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(|f| !f.is_link() && f.include_in_diff)
    }

    pub fn link_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|f| f.is_link())
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {:?})", self.name, self.id, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{AnnotationId, LinkWithRole};
    use test_log::test;

    #[test]
    fn test_check_value_shapes() {
        let value = Feature::string("value");
        assert!(value.check_value(&FeatureValue::from("PER")).is_ok());
        assert!(value.check_value(&FeatureValue::Null).is_ok());
        assert!(matches!(
            value.check_value(&FeatureValue::Integer(3)),
            Err(CurationError::InvalidFeature(_))
        ));

        let score = Feature::primitive("score", PrimitiveType::Float);
        assert!(score.check_value(&FeatureValue::Integer(3)).is_ok());

        let single = Feature::link("arg", None).with_multiplicity(Multiplicity::Single);
        let two = FeatureValue::Links(vec![
            LinkWithRole::new("a", AnnotationId(1)),
            LinkWithRole::new("b", AnnotationId(2)),
        ]);
        assert!(single.check_value(&two).is_err());
        assert!(Feature::link("args", None).check_value(&two).is_ok());
    }

    #[test]
    fn test_layer_toml_defaults() {
        let layer: Layer = toml::from_str(
            r#"
            id = 3
            name = "NamedEntity"
            kind = "Span"
            anchoring_mode = "tokens"

            [[features]]
            name = "value"
            shape = { primitive = "string" }
            "#,
        )
        .unwrap();
        assert_eq!(layer.id, LayerId(3));
        assert_eq!(layer.anchoring_mode, AnchoringMode::Tokens);
        assert_eq!(layer.overlap_mode, OverlapMode::AnyOverlap);
        assert!(layer.cross_sentence);
        assert!(layer.features[0].include_in_diff);
        assert_eq!(layer.label_features().count(), 1);
    }

    #[test]
    fn test_kind_set() {
        let mut kinds = LayerKindSet::from(LayerKind::Span);
        kinds.insert(LayerKind::Relation);
        assert!(kinds.contains(LayerKind::Relation));
        assert!(!kinds.contains(LayerKind::Chain));
        assert_eq!(LayerKindSet::all().len(), 3);
    }
}
