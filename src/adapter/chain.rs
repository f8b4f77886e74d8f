use std::{collections::BTreeSet, sync::Arc};

use super::{require_on_layer, SpanAdapter};
use crate::{
    document::DocumentContext,
    error::CurationError,
    event::{publish_or_warn, AnnotationEvent, EventSink},
    properties::{Annotation, AnnotationId, FeatureValue, LayerId, Offsets, FEAT_NEXT},
    schema::{LayerKind, LayerRegistry},
    store::{AnnotationStore, SelectMode},
    vid::Vid,
};

/// Adapter for chain layers. Links are spans of the chain layer; each link's `next` reference
/// points at its successor, so a chain is the path from a head (a link without predecessor).
#[derive(Clone)]
pub struct ChainAdapter {
    spans: SpanAdapter,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ChainAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChainAdapter({:?})", self.spans)
    }
}

impl ChainAdapter {
    pub fn new(spans: SpanAdapter, sink: Arc<dyn EventSink>) -> Result<Self, CurationError> {
        if spans.layer().kind != LayerKind::Chain {
            return Err(CurationError::IllegalPlacement(format!(
                "layer '{}' is not a chain layer",
                spans.layer().name
            )));
        }
        Ok(ChainAdapter { spans, sink })
    }

    pub fn for_layer(
        registry: &LayerRegistry,
        id: LayerId,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CurationError> {
        ChainAdapter::new(SpanAdapter::for_layer(registry, id, sink.clone())?, sink)
    }

    pub fn spans(&self) -> &SpanAdapter {
        &self.spans
    }

    fn layer_id(&self) -> LayerId {
        self.spans.layer().id
    }

    /// Create a new, unlinked chain link.
    pub fn add_span(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        begin: usize,
        end: usize,
    ) -> Result<AnnotationId, CurationError> {
        self.spans.create(doc, store, begin, end)
    }

    pub fn predecessor(&self, store: &AnnotationStore, id: AnnotationId) -> Option<AnnotationId> {
        store
            .select(self.layer_id(), SelectMode::All)
            .find(|l| l.ref_feature(FEAT_NEXT) == Some(id))
            .map(|l| l.id)
    }

    pub fn successor(&self, store: &AnnotationStore, id: AnnotationId) -> Option<AnnotationId> {
        store.get(id).and_then(|l| l.ref_feature(FEAT_NEXT))
    }

    /// Connect `from.next = to`. Any previous successor of `from` becomes the head of its own
    /// chain.
    #[tracing::instrument(skip(self, store))]
    pub fn link(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        from: AnnotationId,
        to: AnnotationId,
    ) -> Result<(), CurationError> {
        let layer = self.spans.layer();
        require_on_layer(layer, store, from)?;
        require_on_layer(layer, store, to)?;
        if let Some(pred) = self.predecessor(store, to) {
            if pred == from {
                return Ok(());
            }
            return Err(CurationError::IllegalPlacement(format!(
                "{to} is already linked from {pred}"
            )));
        }
        // Walking on from `to` must not come back to `from`.
        let mut seen = BTreeSet::new();
        let mut cursor = Some(to);
        while let Some(current) = cursor {
            if current == from {
                return Err(CurationError::IllegalPlacement(format!(
                    "linking {from} -> {to} would create a cycle"
                )));
            }
            if !seen.insert(current) {
                break;
            }
            cursor = self.successor(store, current);
        }

        store.set_feature(from, FEAT_NEXT, FeatureValue::Ref(to))?;
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::ChainLinked(doc.clone(), self.layer_id(), from, to),
        );
        Ok(())
    }

    /// Cut the link leaving `from`. Returns the former successor.
    #[tracing::instrument(skip(self, store))]
    pub fn unlink(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        from: AnnotationId,
    ) -> Result<Option<AnnotationId>, CurationError> {
        require_on_layer(self.spans.layer(), store, from)?;
        let previous = store
            .set_feature(from, FEAT_NEXT, FeatureValue::Null)?
            .and_then(|v| v.as_ref_id());
        if let Some(to) = previous {
            publish_or_warn(
                self.sink.as_ref(),
                AnnotationEvent::ChainUnlinked(doc.clone(), self.layer_id(), from, to),
            );
        }
        Ok(previous)
    }

    /// The links of the chain containing `id`, in order from the head.
    pub fn chain_of(
        &self,
        store: &AnnotationStore,
        id: AnnotationId,
    ) -> Result<Vec<AnnotationId>, CurationError> {
        require_on_layer(self.spans.layer(), store, id)?;
        let mut seen = BTreeSet::from([id]);
        let mut head = id;
        while let Some(pred) = self.predecessor(store, head) {
            if !seen.insert(pred) {
                break;
            }
            head = pred;
        }

        let mut chain = vec![head];
        let mut seen = BTreeSet::from([head]);
        let mut cursor = self.successor(store, head);
        while let Some(next) = cursor {
            if !seen.insert(next) || !store.contains(next) {
                break;
            }
            chain.push(next);
            cursor = self.successor(store, next);
        }
        Ok(chain)
    }

    /// Every chain of the layer, in head order.
    pub fn chains(&self, store: &AnnotationStore) -> Vec<Vec<AnnotationId>> {
        let heads: Vec<AnnotationId> = store
            .select(self.layer_id(), SelectMode::All)
            .filter(|l| self.predecessor(store, l.id).is_none())
            .map(|l| l.id)
            .collect();
        heads
            .into_iter()
            .filter_map(|head| self.chain_of(store, head).ok())
            .collect()
    }

    /// Delete link `id`, splicing its predecessor to its successor.
    #[tracing::instrument(skip(self, store))]
    pub fn delete(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
    ) -> Result<Annotation, CurationError> {
        require_on_layer(self.spans.layer(), store, id)?;
        let pred = self.predecessor(store, id);
        let succ = self.successor(store, id);

        let removed = self.spans.delete(doc, store, &Vid::new(id))?;
        if let Some(pred) = pred {
            match succ {
                Some(succ) => {
                    store.set_feature(pred, FEAT_NEXT, FeatureValue::Ref(succ))?;
                    publish_or_warn(
                        self.sink.as_ref(),
                        AnnotationEvent::ChainLinked(doc.clone(), self.layer_id(), pred, succ),
                    );
                }
                None => {
                    store.set_feature(pred, FEAT_NEXT, FeatureValue::Null)?;
                }
            }
        }
        Ok(removed)
    }

    /// Offsets of the links of a chain, for display.
    pub fn offsets_of(&self, store: &AnnotationStore, chain: &[AnnotationId]) -> Vec<Offsets> {
        chain
            .iter()
            .filter_map(|id| store.get(*id).map(|l| l.offsets()))
            .collect()
    }
}
