//! Visual objects handed to the (external) renderer.
//!
//! Offsets in a [`VDocument`] are relative to its window. Every object carries the [`Vid`] the
//! client sends back to address it: spans and relations use `id@layer`, link arcs use the
//! slot-addressed form `id.attribute.slot@layer`.

use serde::{Deserialize, Serialize};

use crate::{
    behavior::{BehaviorChain, BehaviorContext},
    error::CurationError,
    properties::{Annotation, LayerId, Offsets, FEAT_NEXT, FEAT_SOURCE, FEAT_TARGET},
    schema::{Layer, LayerKind, LayerRegistry},
    store::{AnnotationStore, SelectMode},
    vid::Vid,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VSpan {
    pub vid: Vid,
    pub layer: LayerId,
    pub begin: usize,
    pub end: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VArc {
    pub vid: Vid,
    pub layer: LayerId,
    pub source: Vid,
    pub target: Vid,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VCommentKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VComment {
    pub vid: Vid,
    pub kind: VCommentKind,
    pub message: String,
}

impl VComment {
    pub fn new<S: Into<String>>(vid: Vid, kind: VCommentKind, message: S) -> Self {
        VComment {
            vid,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VDocument {
    pub window: Offsets,
    pub text: String,
    pub spans: Vec<VSpan>,
    pub arcs: Vec<VArc>,
    pub comments: Vec<VComment>,
}

impl VDocument {
    pub fn new<S: Into<String>>(window: Offsets, text: S) -> Self {
        VDocument {
            window,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn add_span(&mut self, span: VSpan) {
        self.spans.push(span);
    }

    pub fn add_arc(&mut self, arc: VArc) {
        self.arcs.push(arc);
    }

    pub fn add_comment(&mut self, comment: VComment) {
        self.comments.push(comment);
    }

    pub fn comments_for(&self, vid: &Vid) -> impl Iterator<Item = &VComment> {
        let vid = vid.clone();
        self.comments.iter().filter(move |c| c.vid == vid)
    }

    pub fn to_json(&self) -> Result<String, CurationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Label of an instance: its diff-relevant primitive feature values, in schema order.
pub fn label_of(layer: &Layer, anno: &Annotation) -> String {
    layer
        .label_features()
        .filter_map(|f| anno.feature(&f.name).and_then(|v| v.as_label()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns a store window into a [`VDocument`].
#[derive(Debug, Clone)]
pub struct Renderer {
    registry: LayerRegistry,
    behaviors: BehaviorChain,
}

impl Renderer {
    pub fn new(registry: LayerRegistry) -> Self {
        Renderer {
            registry,
            behaviors: BehaviorChain::standard(),
        }
    }

    pub fn with_behaviors(mut self, behaviors: BehaviorChain) -> Self {
        self.behaviors = behaviors;
        self
    }

    fn relative(window: Offsets, offsets: Offsets) -> (usize, usize) {
        let begin = offsets.begin.clamp(window.begin, window.end) - window.begin;
        let end = offsets.end.clamp(window.begin, window.end) - window.begin;
        (begin, end)
    }

    /// Render `layers` of `store` inside `window` (the whole text when `None`).
    #[tracing::instrument(skip(self, store))]
    pub fn render(
        &self,
        store: &AnnotationStore,
        layers: &[LayerId],
        window: Option<Offsets>,
    ) -> Result<VDocument, CurationError> {
        let window = window.unwrap_or(Offsets::new(0, store.text_len()));
        let mut vdoc = VDocument::new(window, store.covered_text(window));

        for layer_id in layers {
            let layer = self.registry.require(*layer_id)?;
            for anno in store.select(layer.id, SelectMode::Overlapping(window)) {
                let vid = Vid::new(anno.id).with_layer(layer.id);
                let label = label_of(&layer, anno);
                match layer.kind {
                    LayerKind::Relation => {
                        let (Some(source), Some(target)) = (
                            anno.ref_feature(FEAT_SOURCE),
                            anno.ref_feature(FEAT_TARGET),
                        ) else {
                            vdoc.add_comment(VComment::new(
                                vid.clone(),
                                VCommentKind::Error,
                                "relation is missing an endpoint",
                            ));
                            continue;
                        };
                        vdoc.add_arc(VArc {
                            vid: vid.clone(),
                            layer: layer.id,
                            source: Vid::new(source),
                            target: Vid::new(target),
                            label,
                        });
                    }
                    LayerKind::Span | LayerKind::Chain => {
                        let (begin, end) = Self::relative(window, anno.offsets());
                        vdoc.add_span(VSpan {
                            vid: vid.clone(),
                            layer: layer.id,
                            begin,
                            end,
                            label,
                        });
                        if let Some(next) = anno.ref_feature(FEAT_NEXT) {
                            vdoc.add_arc(VArc {
                                vid: vid.clone().with_sub(0),
                                layer: layer.id,
                                source: vid.clone(),
                                target: Vid::new(next).with_layer(layer.id),
                                label: String::new(),
                            });
                        }
                    }
                }
                for feature in layer.link_features() {
                    let Some(attribute) = layer.feature_index(&feature.name) else {
                        continue;
                    };
                    for (slot, link) in anno.links(&feature.name).iter().enumerate() {
                        if !store.contains(link.target) {
                            continue;
                        }
                        vdoc.add_arc(VArc {
                            vid: Vid::new(anno.id)
                                .with_slot(attribute as u32, slot as u32)
                                .with_layer(layer.id),
                            layer: layer.id,
                            source: vid.clone(),
                            target: Vid::new(link.target),
                            label: link.role.clone(),
                        });
                    }
                }
            }
            let ctx = BehaviorContext::new(&self.registry, &layer, store);
            self.behaviors.on_render(&ctx, &mut vdoc);
        }
        tracing::debug!(
            "[Renderer::render] {} spans, {} arcs, {} comments",
            vdoc.spans.len(),
            vdoc.arcs.len(),
            vdoc.comments.len()
        );
        Ok(vdoc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::{FeatureValue, LinkWithRole},
        schema::Feature,
        tests::helpers::*,
    };
    use test_log::test;

    #[test]
    fn test_render_spans_and_link_slots() {
        let registry = test_registry();
        let mut store = tokenized_store();
        let per = raw_span(&mut store, NAMED_ENTITY, (0, 4), Some(("value", "PER")));
        let loc = raw_span(&mut store, NAMED_ENTITY, (16, 23), Some(("value", "LOC")));
        let event = raw_span(&mut store, EVENT, (5, 7), Some(("type", "meet")));
        store
            .set_feature(
                event,
                "participants",
                FeatureValue::Links(vec![
                    LinkWithRole::new("agent", per),
                    LinkWithRole::new("place", loc),
                ]),
            )
            .unwrap();

        let vdoc = Renderer::new(registry)
            .render(&store, &[NAMED_ENTITY, EVENT], Some(Offsets::new(0, 15)))
            .unwrap();
        assert_eq!(vdoc.text, "This is a test.");
        let labels: Vec<_> = vdoc.spans.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["PER", "meet"]);
        assert_eq!(vdoc.arcs.len(), 2);
        assert_eq!(vdoc.arcs[1].vid.to_string(), format!("{event}.1.1@6"));
        assert_eq!(vdoc.arcs[1].label, "place");
        assert!(vdoc.comments.is_empty());
    }

    #[test]
    fn test_window_relative_offsets() {
        let registry = test_registry();
        let mut store = tokenized_store();
        raw_span(&mut store, NAMED_ENTITY, (10, 23), Some(("value", "X")));
        let vdoc = Renderer::new(registry)
            .render(&store, &[NAMED_ENTITY], Some(Offsets::new(16, 33)))
            .unwrap();
        assert_eq!((vdoc.spans[0].begin, vdoc.spans[0].end), (0, 7));
    }

    #[test]
    fn test_relation_arcs_and_json() {
        let registry = test_registry();
        let mut store = tokenized_store();
        let a = raw_span(&mut store, NAMED_ENTITY, (0, 4), None);
        let b = raw_span(&mut store, NAMED_ENTITY, (5, 7), None);
        let rel = raw_span(&mut store, RELATION, (5, 7), Some(("label", "knows")));
        store.set_feature(rel, FEAT_SOURCE, FeatureValue::Ref(a)).unwrap();
        store.set_feature(rel, FEAT_TARGET, FeatureValue::Ref(b)).unwrap();
        let dangling = raw_span(&mut store, RELATION, (5, 7), None);

        let vdoc = Renderer::new(registry)
            .render(&store, &[RELATION], None)
            .unwrap();
        assert_eq!(vdoc.arcs.len(), 1);
        assert_eq!(vdoc.arcs[0].source, Vid::new(a));
        assert_eq!(vdoc.arcs[0].label, "knows");
        let dangling_vid = Vid::new(dangling).with_layer(RELATION);
        assert_eq!(vdoc.comments_for(&dangling_vid).count(), 1);

        let json = vdoc.to_json().unwrap();
        assert!(json.contains(&format!("\"{rel}@4\"")));
    }

    #[test]
    fn test_relation_with_link_slots() {
        let registry = test_registry();
        registry.register(
            Layer::relation(LayerId(20), "Claim", Some(NAMED_ENTITY))
                .with_feature(Feature::link("evidence", Some(NAMED_ENTITY))),
        );
        let mut store = tokenized_store();
        let a = raw_span(&mut store, NAMED_ENTITY, (0, 4), None);
        let b = raw_span(&mut store, NAMED_ENTITY, (5, 7), None);
        let proof = raw_span(&mut store, NAMED_ENTITY, (16, 23), None);
        let claim = raw_span(&mut store, LayerId(20), (5, 7), None);
        store.set_feature(claim, FEAT_SOURCE, FeatureValue::Ref(a)).unwrap();
        store.set_feature(claim, FEAT_TARGET, FeatureValue::Ref(b)).unwrap();
        store
            .set_feature(
                claim,
                "evidence",
                FeatureValue::Links(vec![LinkWithRole::new("source", proof)]),
            )
            .unwrap();

        let vdoc = Renderer::new(registry)
            .render(&store, &[LayerId(20)], None)
            .unwrap();
        let claim_vid = Vid::new(claim).with_layer(LayerId(20));
        assert_eq!(vdoc.arcs.len(), 2);
        assert_eq!(vdoc.arcs[0].vid, claim_vid);
        assert_eq!(vdoc.arcs[1].source, claim_vid);
        assert_eq!(vdoc.arcs[1].target, Vid::new(proof));
        assert_eq!(vdoc.arcs[1].vid.slot(), Some(0));
    }

    #[test]
    fn test_unknown_layer() {
        let store = tokenized_store();
        assert!(matches!(
            Renderer::new(test_registry()).render(&store, &[LayerId(99)], None),
            Err(CurationError::NotFound(_))
        ));
    }
}
