/// [crate::properties] contains the basic building blocks for assembling and manipulating
/// [crate::store::AnnotationStore]s: annotation ids, offsets, feature values and the annotation
/// instance itself.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

/// Feature holding the source endpoint of a relation instance.
pub const FEAT_SOURCE: &str = "source";

/// Feature holding the target endpoint of a relation instance.
pub const FEAT_TARGET: &str = "target";

/// Feature holding the successor of a chain link.
pub const FEAT_NEXT: &str = "next";

/// Arena id of an annotation instance.
///
/// Unique within one [crate::store::AnnotationStore] and stable for the lifetime of the instance.
/// Ids are never portable across stores: a reference into another store has to be re-resolved by
/// position.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AnnotationId(pub u64);

impl AnnotationId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for AnnotationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AnnotationId {
    fn from(id: u64) -> Self {
        AnnotationId(id)
    }
}

/// Schema-level layer identifier. Rendered as the `@<layer-id>` suffix of a canonical
/// [crate::vid::Vid].
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct LayerId(pub u32);

impl Display for LayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open `[begin, end)` character range into a text buffer.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct Offsets {
    pub begin: usize,
    pub end: usize,
}

impl Offsets {
    pub fn new(begin: usize, end: usize) -> Self {
        Offsets { begin, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// True for zero-width ranges.
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Overlap test. Zero-width ranges overlap a range that strictly contains their offset, or
    /// another zero-width range at the same offset.
    pub fn overlaps(&self, other: &Offsets) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (false, false) => self.begin < other.end && other.begin < self.end,
            (true, false) => other.begin <= self.begin && self.begin < other.end,
            (false, true) => self.begin <= other.begin && other.begin < self.end,
            (true, true) => self.begin == other.begin,
        }
    }

    /// True if `other` lies completely within this range.
    pub fn covers(&self, other: &Offsets) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// True if `offset` lies strictly between begin and end.
    pub fn strictly_contains(&self, offset: usize) -> bool {
        self.begin < offset && offset < self.end
    }
}

impl Display for Offsets {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{})", self.begin, self.end)
    }
}

impl From<(usize, usize)> for Offsets {
    fn from((begin, end): (usize, usize)) -> Self {
        Offsets { begin, end }
    }
}

/// One `(role, target)` entry of a link feature.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkWithRole {
    pub role: String,
    pub target: AnnotationId,
}

impl LinkWithRole {
    pub fn new<S: Into<String>>(role: S, target: AnnotationId) -> Self {
        LinkWithRole {
            role: role.into(),
            target,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FeatureValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Reference to another instance of the same store (relation endpoints, attach features,
    /// chain successors).
    Ref(AnnotationId),
    /// Ordered link/slot entries.
    Links(Vec<LinkWithRole>),
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            FeatureValue::Bool(_)
                | FeatureValue::Integer(_)
                | FeatureValue::Float(_)
                | FeatureValue::String(_)
        )
    }

    pub fn as_ref_id(&self) -> Option<AnnotationId> {
        match self {
            FeatureValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_links(&self) -> &[LinkWithRole] {
        match self {
            FeatureValue::Links(links) => links,
            _ => &[],
        }
    }

    /// Display form of primitive values, used for labels. References and links have no label.
    pub fn as_label(&self) -> Option<String> {
        match self {
            FeatureValue::Bool(b) => Some(b.to_string()),
            FeatureValue::Integer(i) => Some(i.to_string()),
            FeatureValue::Float(v) => Some(v.to_string()),
            FeatureValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<&str> for FeatureValue {
    fn from(src: &str) -> Self {
        FeatureValue::String(src.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(src: String) -> Self {
        FeatureValue::String(src)
    }
}

impl From<i64> for FeatureValue {
    fn from(src: i64) -> Self {
        FeatureValue::Integer(src)
    }
}

impl From<bool> for FeatureValue {
    fn from(src: bool) -> Self {
        FeatureValue::Bool(src)
    }
}

impl From<f64> for FeatureValue {
    fn from(src: f64) -> Self {
        FeatureValue::Float(src)
    }
}

impl From<AnnotationId> for FeatureValue {
    fn from(src: AnnotationId) -> Self {
        FeatureValue::Ref(src)
    }
}

impl From<Vec<LinkWithRole>> for FeatureValue {
    fn from(src: Vec<LinkWithRole>) -> Self {
        FeatureValue::Links(src)
    }
}

/// A typed, offset-anchored annotation instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub layer: LayerId,
    pub begin: usize,
    pub end: usize,
    pub features: BTreeMap<String, FeatureValue>,
}

impl Annotation {
    pub fn offsets(&self) -> Offsets {
        Offsets::new(self.begin, self.end)
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name).filter(|v| !v.is_null())
    }

    pub fn ref_feature(&self, name: &str) -> Option<AnnotationId> {
        self.feature(name).and_then(FeatureValue::as_ref_id)
    }

    pub fn links(&self, name: &str) -> &[LinkWithRole] {
        self.feature(name).map(FeatureValue::as_links).unwrap_or(&[])
    }

    /// All non-null primitive features, used when comparing instances across stores.
    pub fn primitive_features(&self) -> BTreeMap<&str, &FeatureValue> {
        self.features
            .iter()
            .filter(|(_, v)| v.is_primitive())
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }
}

impl Display for Annotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}{}", self.id, self.layer, self.offsets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_offsets_overlap() {
        let a = Offsets::new(0, 4);
        let b = Offsets::new(3, 6);
        let c = Offsets::new(4, 6);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c), "adjacent ranges do not overlap");

        // Zero-width ranges only overlap when strictly inside or at the same offset
        let z = Offsets::new(2, 2);
        assert!(z.overlaps(&a));
        assert!(a.overlaps(&z));
        assert!(!Offsets::new(4, 4).overlaps(&a));
        assert!(z.overlaps(&Offsets::new(2, 2)));
    }

    #[test]
    fn test_primitive_features_skip_refs_and_links() {
        let mut features = BTreeMap::new();
        features.insert("value".to_string(), FeatureValue::from("PER"));
        features.insert("governor".to_string(), FeatureValue::Ref(AnnotationId(3)));
        features.insert("empty".to_string(), FeatureValue::Null);
        features.insert(
            "args".to_string(),
            FeatureValue::Links(vec![LinkWithRole::new("arg0", AnnotationId(4))]),
        );
        let anno = Annotation {
            id: AnnotationId(1),
            layer: LayerId(2),
            begin: 0,
            end: 4,
            features,
        };
        let prims = anno.primitive_features();
        assert_eq!(prims.len(), 1);
        assert_eq!(prims["value"], &FeatureValue::from("PER"));
        assert_eq!(anno.ref_feature("governor"), Some(AnnotationId(3)));
        assert_eq!(anno.links("args").len(), 1);
        assert!(anno.feature("empty").is_none());
    }
}
