/// [crate::vid] contains the visual identifier (VID), the addressing scheme used at the boundary
/// with renderers and clients to name an annotation instance or one of its sub-parts.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{
    error::CurationError,
    properties::{AnnotationId, LayerId},
};

static SYNTHETIC_VID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ns>[A-Za-z][A-Za-z0-9_]*):(?P<id>-1|\d+)(?:-(?P<payload>\S+))?$")
        .expect("synthetic VID pattern is valid")
});

static CANONICAL_VID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<id>-1|\d+)(?:-(?P<sub>\d+))?(?:\.(?P<attr>\d+))?(?:\.(?P<slot>\d+))?(?:@(?P<layer>\d+))?$",
    )
    .expect("canonical VID pattern is valid")
});

/// Visual identifier.
///
/// Two string forms exist and must stay byte-stable:
///
/// - canonical: `<id>[-<sub-id>][.<attribute>][.<slot>][@<layer-id>]`
/// - synthetic: `<namespace>:<id>[-<payload>]`
///
/// The id is `-1` (unset) or any [`AnnotationId`], so every instance id converts without loss.
/// Larger numbers do not parse.
///
/// A synthetic VID names something with no backing annotation instance (e.g. a suggestion
/// produced by an extension). It never carries sub-unit, attribute, slot or layer addressing:
/// the `with_*` builders leave a synthetic VID unchanged.
///
/// ```rust
/// use curation_core::vid::Vid;
///
/// let vid: Vid = "12.1.0@3".parse().unwrap();
/// assert_eq!(vid.attribute(), Some(1));
/// assert_eq!(vid.slot(), Some(0));
/// assert_eq!(vid.to_string(), "12.1.0@3");
///
/// let synthetic: Vid = "rec:7-abc".parse().unwrap();
/// assert!(synthetic.is_synthetic());
/// assert_eq!(synthetic, Vid::synthetic("rec", Some(7), Some("abc".into())).unwrap());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vid {
    id: Option<u64>,
    sub_id: Option<u32>,
    attribute: Option<u32>,
    slot: Option<u32>,
    layer: Option<u32>,
    ext_namespace: Option<String>,
    ext_payload: Option<String>,
}

impl Vid {
    /// The unset VID, `-1`.
    pub const NONE: Vid = Vid {
        id: None,
        sub_id: None,
        attribute: None,
        slot: None,
        layer: None,
        ext_namespace: None,
        ext_payload: None,
    };

    pub fn new(id: AnnotationId) -> Self {
        Vid {
            id: Some(id.0),
            ..Vid::NONE
        }
    }

    /// A synthetic VID. `id` is `None` for the unset id `-1`. The namespace must be
    /// `[A-Za-z][A-Za-z0-9_]*` and the payload non-empty without whitespace, otherwise the VID
    /// could not be parsed back.
    pub fn synthetic<S: Into<String>>(
        namespace: S,
        id: Option<u64>,
        payload: Option<String>,
    ) -> Result<Self, CurationError> {
        let namespace = namespace.into();
        let mut chars = namespace.chars();
        let valid_namespace = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_namespace {
            return Err(CurationError::MalformedVid(format!(
                "invalid synthetic namespace '{namespace}'"
            )));
        }
        if let Some(payload) = &payload {
            if payload.is_empty() || payload.chars().any(char::is_whitespace) {
                return Err(CurationError::MalformedVid(format!(
                    "invalid synthetic payload '{payload}'"
                )));
            }
        }
        Ok(Vid {
            id,
            ext_namespace: Some(namespace),
            ext_payload: payload,
            ..Vid::NONE
        })
    }

    pub fn with_sub(mut self, sub_id: u32) -> Self {
        if !self.is_synthetic() {
            self.sub_id = Some(sub_id);
        }
        self
    }

    pub fn with_attribute(mut self, attribute: u32) -> Self {
        if !self.is_synthetic() {
            self.attribute = Some(attribute);
        }
        self
    }

    /// Address a slot of a link feature. A slot is only meaningful together with an attribute.
    pub fn with_slot(mut self, attribute: u32, slot: u32) -> Self {
        if !self.is_synthetic() {
            self.attribute = Some(attribute);
            self.slot = Some(slot);
        }
        self
    }

    pub fn with_layer(mut self, layer: LayerId) -> Self {
        if !self.is_synthetic() {
            self.layer = Some(layer.0);
        }
        self
    }

    /// The numeric id, `None` for `-1`.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_synthetic(&self) -> bool {
        self.ext_namespace.is_some()
    }

    /// The backing annotation, for set, non-synthetic VIDs.
    pub fn annotation_id(&self) -> Option<AnnotationId> {
        if self.is_synthetic() {
            return None;
        }
        self.id.map(AnnotationId)
    }

    pub fn sub_id(&self) -> Option<u32> {
        self.sub_id
    }

    pub fn attribute(&self) -> Option<u32> {
        self.attribute
    }

    pub fn slot(&self) -> Option<u32> {
        self.slot
    }

    pub fn layer(&self) -> Option<LayerId> {
        self.layer.map(LayerId)
    }

    pub fn ext_namespace(&self) -> Option<&str> {
        self.ext_namespace.as_deref()
    }

    pub fn ext_payload(&self) -> Option<&str> {
        self.ext_payload.as_deref()
    }

    /// The VID of the instance itself, dropping sub-part addressing.
    pub fn base(&self) -> Vid {
        Vid {
            id: self.id,
            layer: self.layer,
            ext_namespace: self.ext_namespace.clone(),
            ext_payload: self.ext_payload.clone(),
            ..Vid::NONE
        }
    }

    fn parse_id(s: &str) -> Result<Option<u64>, CurationError> {
        if s == "-1" {
            return Ok(None);
        }
        Ok(Some(s.parse::<u64>()?))
    }

    fn parse_u32(caps: &regex::Captures<'_>, name: &str) -> Result<Option<u32>, CurationError> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u32>())
            .transpose()
            .map_err(CurationError::from)
    }
}

impl Default for Vid {
    fn default() -> Self {
        Vid::NONE
    }
}

impl From<AnnotationId> for Vid {
    fn from(id: AnnotationId) -> Self {
        Vid::new(id)
    }
}

struct DisplayId(Option<u64>);

impl Display for DisplayId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("-1"),
        }
    }
}

impl Display for Vid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let id = DisplayId(self.id);
        if let Some(ns) = &self.ext_namespace {
            write!(f, "{ns}:{id}")?;
            if let Some(payload) = &self.ext_payload {
                write!(f, "-{payload}")?;
            }
            return Ok(());
        }
        write!(f, "{id}")?;
        if let Some(sub) = self.sub_id {
            write!(f, "-{sub}")?;
        }
        if let Some(attr) = self.attribute {
            write!(f, ".{attr}")?;
            if let Some(slot) = self.slot {
                write!(f, ".{slot}")?;
            }
        }
        if let Some(layer) = self.layer {
            write!(f, "@{layer}")?;
        }
        Ok(())
    }
}

impl FromStr for Vid {
    type Err = CurationError;

    /// Parse either grammar. Anything else, including integer components that overflow, is a
    /// [`CurationError::MalformedVid`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = SYNTHETIC_VID.captures(s) {
            return Vid::synthetic(
                &caps["ns"],
                Vid::parse_id(&caps["id"])?,
                caps.name("payload").map(|m| m.as_str().to_string()),
            );
        }

        let caps = CANONICAL_VID
            .captures(s)
            .ok_or_else(|| CurationError::MalformedVid(format!("'{s}'")))?;
        Ok(Vid {
            id: Vid::parse_id(&caps["id"])?,
            sub_id: Vid::parse_u32(&caps, "sub")?,
            attribute: Vid::parse_u32(&caps, "attr")?,
            slot: Vid::parse_u32(&caps, "slot")?,
            layer: Vid::parse_u32(&caps, "layer")?,
            ext_namespace: None,
            ext_payload: None,
        })
    }
}

impl Serialize for Vid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Vid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_canonical_round_trip() {
        let vids = [
            Vid::NONE,
            Vid::new(AnnotationId(0)),
            Vid::new(AnnotationId(42)).with_sub(3),
            Vid::new(AnnotationId(42)).with_attribute(1),
            Vid::new(AnnotationId(42)).with_slot(1, 0),
            Vid::new(AnnotationId(42)).with_layer(LayerId(7)),
            Vid::new(AnnotationId(42))
                .with_sub(3)
                .with_slot(2, 5)
                .with_layer(LayerId(7)),
            Vid::NONE.with_sub(2),
            Vid::new(AnnotationId(99_999_999_999)).with_attribute(1),
            Vid::new(AnnotationId(u64::MAX)),
        ];
        for vid in vids {
            let parsed: Vid = vid.to_string().parse().unwrap();
            assert_eq!(parsed, vid, "round trip of {vid}");
        }
    }

    #[test]
    fn test_synthetic_round_trip() {
        let vids = [
            Vid::synthetic("rec", Some(7), None).unwrap(),
            Vid::synthetic("rec", Some(7), Some("12".to_string())).unwrap(),
            Vid::synthetic("ext_1", None, Some("a-b.c@d".to_string())).unwrap(),
            Vid::synthetic("rec", Some(u64::MAX), None).unwrap(),
        ];
        for vid in vids {
            let parsed: Vid = vid.to_string().parse().unwrap();
            assert_eq!(parsed, vid, "round trip of {vid}");
            assert!(parsed.is_synthetic());
            assert!(parsed.annotation_id().is_none());
        }
    }

    #[test]
    fn test_exact_string_forms() {
        assert_eq!(Vid::NONE.to_string(), "-1");
        assert_eq!(
            Vid::new(AnnotationId(5))
                .with_sub(1)
                .with_slot(2, 3)
                .with_layer(LayerId(4))
                .to_string(),
            "5-1.2.3@4"
        );
        assert_eq!(
            Vid::synthetic("rec", Some(9), Some("x".into()))
                .unwrap()
                .to_string(),
            "rec:9-x"
        );
    }

    #[test]
    fn test_malformed() {
        for s in [
            "",
            "abc",
            "-2",
            "1.",
            "1..2",
            "1@",
            "1.2.3.4",
            "1-",
            ":5",
            "9rec:5",
            "rec:",
            "rec:x",
            "1 ",
            "18446744073709551616.1",
            "1.99999999999",
            "rec:-5",
            "rec:-0",
        ] {
            assert!(
                matches!(s.parse::<Vid>(), Err(CurationError::MalformedVid(_))),
                "'{s}' should be malformed"
            );
        }
    }

    #[test]
    fn test_id_range_matches_annotation_ids() {
        let vid: Vid = "99999999999.1".parse().unwrap();
        assert_eq!(vid.annotation_id(), Some(AnnotationId(99_999_999_999)));
        let max: Vid = u64::MAX.to_string().parse().unwrap();
        assert_eq!(max, Vid::new(AnnotationId(u64::MAX)));
        assert!(max.is_set());
        assert_ne!(max, Vid::NONE);
        assert_eq!(Vid::NONE.id(), None);
    }

    #[test]
    fn test_synthetic_builders_stay_parseable() {
        let vid = Vid::synthetic("rec", Some(3), None)
            .unwrap()
            .with_sub(1)
            .with_slot(2, 0)
            .with_layer(LayerId(4));
        assert_eq!(vid.to_string(), "rec:3");
        assert_eq!(vid.to_string().parse::<Vid>().unwrap(), vid);

        for payload in ["", "a b", " ", "x\ty"] {
            assert!(matches!(
                Vid::synthetic("rec", Some(3), Some(payload.to_string())),
                Err(CurationError::MalformedVid(_))
            ));
        }
        for namespace in ["", "9rec", "re c", "rec:"] {
            assert!(matches!(
                Vid::synthetic(namespace, None, None),
                Err(CurationError::MalformedVid(_))
            ));
        }
    }

    #[test]
    fn test_is_set_and_accessors() {
        let vid: Vid = "12-1.3.0@2".parse().unwrap();
        assert!(vid.is_set());
        assert_eq!(vid.annotation_id(), Some(AnnotationId(12)));
        assert_eq!(vid.sub_id(), Some(1));
        assert_eq!(vid.attribute(), Some(3));
        assert_eq!(vid.slot(), Some(0));
        assert_eq!(vid.layer(), Some(LayerId(2)));
        assert_eq!(vid.base().to_string(), "12@2");
        assert!(!Vid::NONE.is_set());
        assert_eq!(Vid::default(), Vid::NONE);
    }

    #[test]
    fn test_serde_uses_string_form() {
        let vid = Vid::new(AnnotationId(3)).with_slot(0, 1);
        let json = serde_json::to_string(&vid).unwrap();
        assert_eq!(json, "\"3.0.1\"");
        let back: Vid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vid);
        assert!(serde_json::from_str::<Vid>("\"nope\"").is_err());
    }
}
