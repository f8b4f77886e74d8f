use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::properties::{AnnotationId, LayerId, Offsets};

/// Where an annotation sits, independent of the store it came from. Two instances from different
/// annotators are compared iff their positions are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    Span {
        layer: LayerId,
        begin: usize,
        end: usize,
    },
    Relation {
        layer: LayerId,
        source: Offsets,
        target: Offsets,
    },
    /// One entry of a link feature. Depending on the
    /// [`LinkCompareBehavior`](super::LinkCompareBehavior) either the role or the target offsets
    /// are part of the position, the other one becomes the label.
    Link {
        layer: LayerId,
        begin: usize,
        end: usize,
        feature: String,
        role: Option<String>,
        target: Option<Offsets>,
    },
}

impl Position {
    pub fn layer(&self) -> LayerId {
        match self {
            Position::Span { layer, .. }
            | Position::Relation { layer, .. }
            | Position::Link { layer, .. } => *layer,
        }
    }

    /// The offsets an instance at this position occupies in the text.
    pub fn offsets(&self) -> Offsets {
        match self {
            Position::Span { begin, end, .. } | Position::Link { begin, end, .. } => {
                Offsets::new(*begin, *end)
            }
            Position::Relation { target, .. } => *target,
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Span { layer, begin, end } => write!(f, "span@{layer}[{begin},{end})"),
            Position::Relation {
                layer,
                source,
                target,
            } => write!(f, "relation@{layer}{source}->{target}"),
            Position::Link {
                layer,
                begin,
                end,
                feature,
                role,
                target,
            } => {
                write!(f, "link@{layer}[{begin},{end}).{feature}")?;
                if let Some(role) = role {
                    write!(f, "[{role}]")?;
                }
                if let Some(target) = target {
                    write!(f, "->{target}")?;
                }
                Ok(())
            }
        }
    }
}

/// All members of a [`ConfigurationSet`] that agree on the label: annotator -> instance ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub label: String,
    pub members: BTreeMap<String, Vec<AnnotationId>>,
}

impl Configuration {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Configuration {
            label: label.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn add<S: Into<String>>(&mut self, annotator: S, id: AnnotationId) {
        self.members.entry(annotator.into()).or_default().push(id);
    }

    pub fn annotators(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn contains(&self, annotator: &str) -> bool {
        self.members.contains_key(annotator)
    }

    pub fn ids(&self, annotator: &str) -> &[AnnotationId] {
        self.members
            .get(annotator)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Every configuration found at one position, ordered by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSet {
    pub position: Position,
    pub configurations: Vec<Configuration>,
}

impl ConfigurationSet {
    pub fn new(position: Position) -> Self {
        ConfigurationSet {
            position,
            configurations: vec![],
        }
    }

    pub fn annotators(&self) -> BTreeSet<&str> {
        self.configurations
            .iter()
            .flat_map(Configuration::annotators)
            .collect()
    }

    /// Configurations that at least one of `annotators` takes part in.
    pub fn configurations_of<'a>(
        &'a self,
        annotators: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a Configuration> + 'a {
        self.configurations
            .iter()
            .filter(move |c| c.annotators().any(|a| annotators.contains(a)))
    }

    /// Number of instances `annotator` has at this position.
    pub fn count_of(&self, annotator: &str) -> usize {
        self.configurations.iter().map(|c| c.ids(annotator).len()).sum()
    }

    pub fn is_stacked(&self) -> bool {
        self.annotators().iter().any(|a| self.count_of(a) > 1)
    }

    pub fn configuration_of(&self, annotator: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.contains(annotator))
    }
}
