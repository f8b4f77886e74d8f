//! Cross-annotator comparison.
//!
//! The [`DiffEngine`] maps every instance of every annotator's store to a [`Position`] plus a
//! label, then groups the results: members at the same position with equal labels form one
//! [`Configuration`], all configurations at one position form a [`ConfigurationSet`]. The
//! [`DiffResult`] classifies each set as complete, incomplete, differing and/or stacked.
//!
//! Extraction runs per annotator on scoped threads; grouping happens in ordered maps keyed by
//! position, so the grouping does not depend on instance ids or on the order in which instances
//! were created.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    properties::{Annotation, AnnotationId, LayerId, Offsets, FEAT_SOURCE, FEAT_TARGET},
    schema::{Layer, LayerKind, LayerRegistry},
    store::{AnnotationStore, SelectMode},
};

pub mod position;

pub use position::{Configuration, ConfigurationSet, Position};

/// How link feature entries are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkCompareBehavior {
    /// The role is part of the position; annotators disagree if they link the same role to
    /// different targets.
    #[default]
    TargetAsLabel,
    /// The target is part of the position; annotators disagree if they link the same target under
    /// different roles.
    RoleAsLabel,
}

/// One extracted instance: where it is, what it says, and which instance said it.
type Extracted = (Position, String, AnnotationId);

#[derive(Debug, Clone)]
pub struct DiffEngine {
    registry: LayerRegistry,
    link_compare: LinkCompareBehavior,
    eligible: Option<BTreeSet<String>>,
}

impl DiffEngine {
    pub fn new(registry: LayerRegistry) -> Self {
        DiffEngine {
            registry,
            link_compare: LinkCompareBehavior::default(),
            eligible: None,
        }
    }

    pub fn with_link_compare(mut self, behavior: LinkCompareBehavior) -> Self {
        self.link_compare = behavior;
        self
    }

    /// Restrict classification to these annotators. Other stores still contribute configurations
    /// but never make a position incomplete or differing.
    pub fn with_eligible<I, S>(mut self, annotators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eligible = Some(annotators.into_iter().map(Into::into).collect());
        self
    }

    #[tracing::instrument(skip(self, stores))]
    pub fn compute(
        &self,
        stores: &BTreeMap<String, &AnnotationStore>,
        layers: &[LayerId],
        window: Option<Offsets>,
    ) -> DiffResult {
        let layers: Vec<std::sync::Arc<Layer>> = layers
            .iter()
            .filter_map(|id| {
                let layer = self.registry.get(*id);
                if layer.is_none() {
                    tracing::warn!("[DiffEngine::compute] unknown layer {id}, skipping");
                }
                layer
            })
            .collect();

        let extracted: Vec<(String, Vec<Extracted>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = stores
                .iter()
                .map(|(annotator, store)| {
                    let layers = &layers;
                    let handle = scope.spawn(move || {
                        layers
                            .iter()
                            .flat_map(|layer| self.extract(layer, store, window))
                            .collect::<Vec<_>>()
                    });
                    (annotator.clone(), handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(annotator, handle)| match handle.join() {
                    Ok(found) => (annotator, found),
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let mut grouped: BTreeMap<Position, BTreeMap<String, Configuration>> = BTreeMap::new();
        for (annotator, found) in extracted {
            for (position, label, id) in found {
                grouped
                    .entry(position)
                    .or_default()
                    .entry(label.clone())
                    .or_insert_with(|| Configuration::new(label))
                    .add(annotator.as_str(), id);
            }
        }

        let sets: Vec<ConfigurationSet> = grouped
            .into_iter()
            .map(|(position, by_label)| ConfigurationSet {
                position,
                configurations: by_label.into_values().collect(),
            })
            .collect();

        let annotators: BTreeSet<String> = stores.keys().cloned().collect();
        let eligible = self
            .eligible
            .clone()
            .unwrap_or_else(|| annotators.clone());
        tracing::debug!(
            "[DiffEngine::compute] {} positions across {} annotators",
            sets.len(),
            annotators.len()
        );
        DiffResult {
            annotators,
            eligible,
            sets,
        }
    }

    fn extract(
        &self,
        layer: &Layer,
        store: &AnnotationStore,
        window: Option<Offsets>,
    ) -> Vec<Extracted> {
        let mode = match window {
            Some(window) => SelectMode::Overlapping(window),
            None => SelectMode::All,
        };
        let mut found = vec![];
        for anno in store.select(layer.id, mode) {
            let position = match layer.kind {
                LayerKind::Span | LayerKind::Chain => Position::Span {
                    layer: layer.id,
                    begin: anno.begin,
                    end: anno.end,
                },
                LayerKind::Relation => {
                    let endpoint = |feature: &str| {
                        anno.ref_feature(feature)
                            .and_then(|id| store.get(id))
                            .map(Annotation::offsets)
                    };
                    let (Some(source), Some(target)) =
                        (endpoint(FEAT_SOURCE), endpoint(FEAT_TARGET))
                    else {
                        tracing::debug!("[DiffEngine::extract] skipping dangling relation {anno}");
                        continue;
                    };
                    Position::Relation {
                        layer: layer.id,
                        source,
                        target,
                    }
                }
            };
            found.push((position, label(layer, anno), anno.id));
            found.extend(self.extract_links(layer, store, anno));
        }
        found
    }

    fn extract_links(
        &self,
        layer: &Layer,
        store: &AnnotationStore,
        anno: &Annotation,
    ) -> Vec<Extracted> {
        let mut found = vec![];
        for feature in layer.link_features().filter(|f| f.include_in_diff) {
            for link in anno.links(&feature.name) {
                let target = store.get(link.target).map(Annotation::offsets);
                let (role, target, label) = match self.link_compare {
                    LinkCompareBehavior::TargetAsLabel => (
                        Some(link.role.clone()),
                        None,
                        target.map(|t| t.to_string()).unwrap_or_default(),
                    ),
                    LinkCompareBehavior::RoleAsLabel => (None, target, link.role.clone()),
                };
                found.push((
                    Position::Link {
                        layer: layer.id,
                        begin: anno.begin,
                        end: anno.end,
                        feature: feature.name.clone(),
                        role,
                        target,
                    },
                    label,
                    anno.id,
                ));
            }
        }
        found
    }
}

/// The label of an instance: the values of its diff-relevant primitive features in schema order.
fn label(layer: &Layer, anno: &Annotation) -> String {
    layer
        .label_features()
        .map(|f| {
            anno.feature(&f.name)
                .and_then(|v| v.as_label())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    annotators: BTreeSet<String>,
    eligible: BTreeSet<String>,
    sets: Vec<ConfigurationSet>,
}

impl DiffResult {
    /// Every configuration set, ordered by position.
    pub fn sets(&self) -> &[ConfigurationSet] {
        &self.sets
    }

    pub fn annotators(&self) -> &BTreeSet<String> {
        &self.annotators
    }

    pub fn eligible(&self) -> &BTreeSet<String> {
        &self.eligible
    }

    pub fn configuration_set(&self, position: &Position) -> Option<&ConfigurationSet> {
        self.sets
            .binary_search_by(|s| s.position.cmp(position))
            .ok()
            .map(|idx| &self.sets[idx])
    }

    fn is_incomplete(&self, set: &ConfigurationSet) -> bool {
        let present = set.annotators();
        self.eligible.iter().any(|a| !present.contains(a.as_str()))
    }

    fn is_differing(&self, set: &ConfigurationSet) -> bool {
        set.configurations_of(&self.eligible).count() > 1
    }

    /// Every eligible annotator agrees on a single, unstacked configuration.
    pub fn complete(&self) -> Vec<&ConfigurationSet> {
        self.sets
            .iter()
            .filter(|s| !self.is_incomplete(s) && !self.is_differing(s) && !s.is_stacked())
            .collect()
    }

    /// At least one eligible annotator has nothing at the position.
    pub fn incomplete(&self) -> Vec<&ConfigurationSet> {
        self.sets.iter().filter(|s| self.is_incomplete(s)).collect()
    }

    /// Every eligible annotator is present, but they disagree on the label.
    pub fn differing(&self) -> Vec<&ConfigurationSet> {
        self.sets
            .iter()
            .filter(|s| !self.is_incomplete(s) && self.is_differing(s))
            .collect()
    }

    /// Some annotator has more than one instance at the position.
    pub fn stacked(&self) -> Vec<&ConfigurationSet> {
        self.sets.iter().filter(|s| s.is_stacked()).collect()
    }

    pub fn is_agreement(&self) -> bool {
        self.sets
            .iter()
            .all(|s| !self.is_incomplete(s) && !self.is_differing(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::{FeatureValue, LinkWithRole},
        tests::helpers::*,
    };
    use test_log::test;

    fn ne_span(store: &mut AnnotationStore, offsets: (usize, usize), value: &str) -> AnnotationId {
        raw_span(store, NAMED_ENTITY, offsets, Some(("value", value)))
    }

    fn compute(engine: &DiffEngine, stores: &[(&str, &AnnotationStore)]) -> DiffResult {
        let map: BTreeMap<String, &AnnotationStore> =
            stores.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        engine.compute(&map, &[NAMED_ENTITY, RELATION, EVENT], None)
    }

    fn span_position(begin: usize, end: usize) -> Position {
        Position::Span {
            layer: NAMED_ENTITY,
            begin,
            end,
        }
    }

    #[test]
    fn test_classification() {
        let mut alice = tokenized_store();
        let mut bob = tokenized_store();
        // agreement
        ne_span(&mut alice, (0, 4), "PER");
        ne_span(&mut bob, (0, 4), "PER");
        // disagreement
        ne_span(&mut alice, (10, 14), "LOC");
        ne_span(&mut bob, (10, 14), "ORG");
        // only alice
        ne_span(&mut alice, (16, 23), "PER");

        let result = compute(&DiffEngine::new(test_registry()), &[("alice", &alice), ("bob", &bob)]);
        assert_eq!(result.sets().len(), 3);
        assert_eq!(result.complete().len(), 1);
        assert_eq!(result.complete()[0].position, span_position(0, 4));
        assert_eq!(result.differing().len(), 1);
        assert_eq!(result.differing()[0].position, span_position(10, 14));
        assert_eq!(result.incomplete().len(), 1);
        assert_eq!(result.incomplete()[0].position, span_position(16, 23));
        assert!(result.stacked().is_empty());
        assert!(!result.is_agreement());

        let set = result.configuration_set(&span_position(10, 14)).unwrap();
        assert_eq!(set.configurations.len(), 2);
        assert_eq!(set.configuration_of("bob").unwrap().label, "ORG");
    }

    type Annotations<'a> = &'a [((usize, usize), &'a str)];

    /// Everything of a result except the store-local instance ids.
    fn shape(result: &DiffResult) -> Vec<(Position, Vec<(String, Vec<(String, usize)>)>)> {
        result
            .sets()
            .iter()
            .map(|set| {
                let configurations = set
                    .configurations
                    .iter()
                    .map(|c| {
                        let members = c
                            .members
                            .iter()
                            .map(|(annotator, ids)| (annotator.clone(), ids.len()))
                            .collect();
                        (c.label.clone(), members)
                    })
                    .collect();
                (set.position.clone(), configurations)
            })
            .collect()
    }

    fn classes(result: &DiffResult) -> [Vec<Position>; 4] {
        let positions =
            |sets: Vec<&ConfigurationSet>| sets.into_iter().map(|s| s.position.clone()).collect();
        [
            positions(result.complete()),
            positions(result.incomplete()),
            positions(result.differing()),
            positions(result.stacked()),
        ]
    }

    fn annotate(store: &mut AnnotationStore, spans: Annotations<'_>, reversed: bool) {
        if reversed {
            // Burn an id so that no instance keeps the id it has in the other store
            let scratch = store.create(NAMED_ENTITY, 0, 0).unwrap();
            store.remove(scratch).unwrap();
            for (offsets, value) in spans.iter().rev() {
                ne_span(store, *offsets, value);
            }
        } else {
            for (offsets, value) in spans {
                ne_span(store, *offsets, value);
            }
        }
    }

    #[test]
    fn test_order_insensitive() {
        let alice: Annotations<'_> = &[
            ((0, 4), "PER"),
            ((5, 7), "PER"),
            ((16, 23), "LOC"),
            ((10, 14), "ORG"),
        ];
        let bob: Annotations<'_> = &[((16, 23), "LOC"), ((0, 4), "LOC"), ((5, 7), "PER")];
        let carol: Annotations<'_> = &[
            ((5, 7), "PER"),
            ((16, 23), "LOC"),
            ((0, 4), "PER"),
            ((5, 7), "PER"),
        ];

        let build = |reversed: bool| {
            [alice, bob, carol].map(|spans| {
                let mut store = tokenized_store();
                annotate(&mut store, spans, reversed);
                store
            })
        };
        let [a1, b1, c1] = build(false);
        let [a2, b2, c2] = build(true);

        let engine = DiffEngine::new(test_registry());
        let forward = compute(&engine, &[("alice", &a1), ("bob", &b1), ("carol", &c1)]);
        let reversed = compute(&engine, &[("carol", &c2), ("bob", &b2), ("alice", &a2)]);

        // Same grouping and classification, reached from different ids and insertion orders
        assert_ne!(forward, reversed);
        assert_eq!(shape(&forward), shape(&reversed));
        assert_eq!(classes(&forward), classes(&reversed));
        assert_eq!(
            classes(&forward),
            [
                vec![span_position(16, 23)],
                vec![span_position(10, 14)],
                vec![span_position(0, 4)],
                vec![span_position(5, 7)],
            ]
        );
    }

    #[test]
    fn test_stacking_detected() {
        let mut alice = tokenized_store();
        let mut bob = tokenized_store();
        ne_span(&mut alice, (0, 4), "PER");
        ne_span(&mut alice, (0, 4), "PER");
        ne_span(&mut bob, (0, 4), "PER");

        let result = compute(&DiffEngine::new(test_registry()), &[("alice", &alice), ("bob", &bob)]);
        assert_eq!(result.stacked().len(), 1);
        assert!(result.complete().is_empty());
        assert!(result.differing().is_empty());
        assert_eq!(result.sets()[0].count_of("alice"), 2);
    }

    #[test]
    fn test_relations_compared_by_endpoint_offsets() {
        let mut alice = tokenized_store();
        let mut bob = tokenized_store();
        for (store, label) in [(&mut alice, "knows"), (&mut bob, "likes")] {
            // Different creation order gives different ids for the same positions
            let b = ne_span(store, (16, 23), "PER");
            let a = ne_span(store, (0, 4), "PER");
            let r = store.create(RELATION, 16, 23).unwrap();
            store.set_feature(r, FEAT_SOURCE, FeatureValue::Ref(a)).unwrap();
            store.set_feature(r, FEAT_TARGET, FeatureValue::Ref(b)).unwrap();
            store.set_feature(r, "label", label.into()).unwrap();
        }
        let result = compute(&DiffEngine::new(test_registry()), &[("alice", &alice), ("bob", &bob)]);
        let relation = Position::Relation {
            layer: RELATION,
            source: Offsets::new(0, 4),
            target: Offsets::new(16, 23),
        };
        assert_eq!(result.differing().len(), 1);
        assert_eq!(result.differing()[0].position, relation);
        assert_eq!(result.complete().len(), 2);
    }

    #[test]
    fn test_link_compare_behaviors() {
        let mut alice = tokenized_store();
        let mut bob = tokenized_store();
        for (store, role) in [(&mut alice, "agent"), (&mut bob, "patient")] {
            let per = ne_span(store, (0, 4), "PER");
            let event = raw_span(store, EVENT, (5, 7), Some(("type", "meet")));
            store
                .set_feature(
                    event,
                    "participants",
                    FeatureValue::Links(vec![LinkWithRole::new(role, per)]),
                )
                .unwrap();
        }
        let stores = [("alice", &alice), ("bob", &bob)];

        // Different roles: two positions, each incomplete
        let by_target = compute(&DiffEngine::new(test_registry()), &stores);
        let links: Vec<_> = by_target
            .incomplete()
            .into_iter()
            .filter(|s| matches!(s.position, Position::Link { .. }))
            .collect();
        assert_eq!(links.len(), 2);

        // Same target: one position, differing role labels
        let by_role = compute(
            &DiffEngine::new(test_registry()).with_link_compare(LinkCompareBehavior::RoleAsLabel),
            &stores,
        );
        let differing = by_role.differing();
        assert_eq!(differing.len(), 1);
        assert!(matches!(
            &differing[0].position,
            Position::Link { target: Some(t), role: None, .. } if *t == Offsets::new(0, 4)
        ));
    }

    #[test]
    fn test_ineligible_annotator_ignored_in_classification() {
        let mut alice = tokenized_store();
        let mut bob = tokenized_store();
        let mut curator = tokenized_store();
        ne_span(&mut alice, (0, 4), "PER");
        ne_span(&mut bob, (0, 4), "PER");
        ne_span(&mut curator, (0, 4), "LOC");

        let stores = [("alice", &alice), ("bob", &bob), ("curator", &curator)];
        let all = compute(&DiffEngine::new(test_registry()), &stores);
        assert_eq!(all.differing().len(), 1);

        let annotators_only = compute(
            &DiffEngine::new(test_registry()).with_eligible(["alice", "bob"]),
            &stores,
        );
        assert!(annotators_only.differing().is_empty());
        assert_eq!(annotators_only.complete().len(), 1);
        assert!(annotators_only.is_agreement());
    }

    #[test]
    fn test_window_restricts_positions() {
        let mut alice = tokenized_store();
        ne_span(&mut alice, (0, 4), "PER");
        ne_span(&mut alice, (16, 23), "PER");
        let map = BTreeMap::from([("alice".to_string(), &alice)]);
        let result = DiffEngine::new(test_registry()).compute(
            &map,
            &[NAMED_ENTITY],
            Some(Offsets::new(16, 33)),
        );
        assert_eq!(result.sets().len(), 1);
        assert_eq!(result.sets()[0].position, span_position(16, 23));
    }
}
