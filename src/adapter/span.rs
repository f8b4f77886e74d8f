use std::sync::Arc;

use super::{check_feature_value, require_on_layer, SegmentationAdapter};
use crate::{
    behavior::{BehaviorChain, BehaviorContext, CreateRequest, MoveRequest, ValidationFinding},
    document::DocumentContext,
    error::CurationError,
    event::{publish_or_warn, AnnotationEvent, EventSink},
    properties::{Annotation, AnnotationId, FeatureValue, LayerId, Offsets},
    schema::{Layer, LayerKind, LayerRegistry},
    store::{AnnotationStore, SelectMode, Selection},
    vid::Vid,
};

/// Adapter for span layers (and the span side of chain layers).
///
/// Creation and moves are folded through the layer's [`BehaviorChain`]; if the layer declares an
/// attach-type, the placement must also overlap an instance of the attach layer, whose attach
/// feature is then pointed at the span. Segmentation layers are routed to a
/// [`SegmentationAdapter`]: a zero-width create splits a unit, a delete merges it into a neighbour
/// and a move resizes one boundary.
#[derive(Clone)]
pub struct SpanAdapter {
    layer: Arc<Layer>,
    registry: LayerRegistry,
    behaviors: BehaviorChain,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SpanAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SpanAdapter({}, {:?})", self.layer, self.behaviors)
    }
}

impl SpanAdapter {
    pub fn new(
        layer: Arc<Layer>,
        registry: LayerRegistry,
        behaviors: BehaviorChain,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CurationError> {
        if layer.kind == LayerKind::Relation {
            return Err(CurationError::IllegalPlacement(format!(
                "layer '{}' is a relation layer",
                layer.name
            )));
        }
        Ok(SpanAdapter {
            layer,
            registry,
            behaviors,
            sink,
        })
    }

    /// An adapter for layer `id` with the standard behavior chain.
    pub fn for_layer(
        registry: &LayerRegistry,
        id: LayerId,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CurationError> {
        SpanAdapter::new(
            registry.require(id)?,
            registry.clone(),
            BehaviorChain::standard(),
            sink,
        )
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn behaviors(&self) -> &BehaviorChain {
        &self.behaviors
    }

    fn behavior_ctx<'a>(&'a self, store: &'a AnnotationStore) -> BehaviorContext<'a> {
        BehaviorContext::new(&self.registry, &self.layer, store)
    }

    fn segmentation(&self) -> Result<SegmentationAdapter, CurationError> {
        SegmentationAdapter::new(self.layer.clone(), self.sink.clone())
    }

    /// The first attach-layer instance overlapping `range`, if the layer declares an attach-type.
    fn attach_host(
        &self,
        store: &AnnotationStore,
        range: Offsets,
    ) -> Result<Option<(AnnotationId, String)>, CurationError> {
        let Some(attach) = &self.layer.attach else {
            return Ok(None);
        };
        store
            .select(attach.layer, SelectMode::Overlapping(range))
            .next()
            .map(|host| Some((host.id, attach.feature.clone())))
            .ok_or_else(|| {
                CurationError::IllegalPlacement(format!(
                    "no annotation to attach to at {range} for layer '{}'",
                    self.layer.name
                ))
            })
    }

    /// Drop attach-feature references to `id`.
    fn detach(&self, store: &mut AnnotationStore, id: AnnotationId) -> Result<(), CurationError> {
        let Some(attach) = &self.layer.attach else {
            return Ok(());
        };
        let hosts: Vec<AnnotationId> = store
            .referencing(id)
            .into_iter()
            .filter(|(host, feature)| {
                feature == &attach.feature
                    && store.get(*host).map(|h| h.layer) == Some(attach.layer)
            })
            .map(|(host, _)| host)
            .collect();
        for host in hosts {
            store.set_feature(host, attach.feature.clone(), FeatureValue::Null)?;
        }
        Ok(())
    }

    /// Where a span requested at `[begin, end)` would be placed, without touching the store.
    pub fn plan_create(
        &self,
        store: &AnnotationStore,
        begin: usize,
        end: usize,
    ) -> Result<Offsets, CurationError> {
        let request = self
            .behaviors
            .on_create(&self.behavior_ctx(store), CreateRequest::span(begin, end))?;
        self.attach_host(store, request.range)?;
        Ok(request.range)
    }

    #[tracing::instrument(skip(self, store))]
    pub fn create(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        begin: usize,
        end: usize,
    ) -> Result<AnnotationId, CurationError> {
        if self.layer.is_segmentation() && begin == end {
            return self.segmentation()?.split(doc, store, begin);
        }
        let range = self.plan_create(store, begin, end)?;
        let host = self.attach_host(store, range)?;

        let id = store.create(self.layer.id, range.begin, range.end)?;
        if let Some((host, feature)) = host {
            store.set_feature(host, feature, FeatureValue::Ref(id))?;
        }
        tracing::debug!(
            "[SpanAdapter::create] {} {id} at {range} (requested [{begin},{end}))",
            self.layer.name
        );
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::SpanCreated(doc.clone(), self.layer.id, id, range),
        );
        Ok(id)
    }

    /// Move span `id`. Moving to the range it already has is a no-op.
    #[tracing::instrument(skip(self, store))]
    pub fn move_span(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
        begin: usize,
        end: usize,
    ) -> Result<AnnotationId, CurationError> {
        if self.layer.is_segmentation() {
            return self.segmentation()?.move_unit(doc, store, id, begin, end);
        }
        let old = require_on_layer(&self.layer, store, id)?.offsets();
        let request = self.behaviors.on_move(
            &self.behavior_ctx(store),
            MoveRequest {
                id,
                range: Offsets::new(begin, end),
            },
        )?;
        if request.range == old {
            tracing::debug!("[SpanAdapter::move_span] {id} already at {old}");
            return Ok(id);
        }
        let host = self.attach_host(store, request.range)?;

        store.set_range(id, request.range.begin, request.range.end)?;
        if let Some((host, feature)) = host {
            self.detach(store, id)?;
            store.set_feature(host, feature, FeatureValue::Ref(id))?;
        }
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::SpanMoved(doc.clone(), self.layer.id, id, old, request.range),
        );
        Ok(id)
    }

    /// Delete the span addressed by `vid`, clearing attach features that point at it.
    ///
    /// Relations using the span as an endpoint are left in place and become dangling. They show up
    /// in [`RelationAdapter::validate`](super::RelationAdapter::validate) and are removed by
    /// [`RelationAdapter::delete_dangling`](super::RelationAdapter::delete_dangling), which the
    /// caller runs once after a batch of deletions.
    #[tracing::instrument(skip(self, store))]
    pub fn delete(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        vid: &Vid,
    ) -> Result<Annotation, CurationError> {
        let id = vid
            .annotation_id()
            .ok_or_else(|| CurationError::NotFound(format!("VID {vid} addresses no annotation")))?;
        if self.layer.is_segmentation() {
            let removed = require_on_layer(&self.layer, store, id)?.clone();
            self.segmentation()?.delete(doc, store, id)?;
            return Ok(removed);
        }
        require_on_layer(&self.layer, store, id)?;

        self.detach(store, id)?;
        let removed = store.remove(id)?;
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::SpanDeleted(doc.clone(), self.layer.id, id, removed.offsets()),
        );
        Ok(removed)
    }

    /// Undo a delete: re-insert `anno` under its original id and re-link its attach feature.
    #[tracing::instrument(skip(self, store, anno))]
    pub fn restore(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        anno: Annotation,
    ) -> Result<AnnotationId, CurationError> {
        if anno.layer != self.layer.id {
            return Err(CurationError::IllegalPlacement(format!(
                "{anno} does not belong to layer '{}'",
                self.layer.name
            )));
        }
        let range = anno.offsets();
        let host = self.attach_host(store, range)?;
        let id = store.restore(anno)?;
        if let Some((host, feature)) = host {
            store.set_feature(host, feature, FeatureValue::Ref(id))?;
        }
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::SpanCreated(doc.clone(), self.layer.id, id, range),
        );
        Ok(id)
    }

    /// Every behavior's findings for this layer. Never fails.
    pub fn validate(&self, store: &AnnotationStore) -> Vec<ValidationFinding> {
        self.behaviors.on_validate(&self.behavior_ctx(store))
    }

    /// Schema-checked feature update.
    #[tracing::instrument(skip(self, store, value))]
    pub fn set_feature(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
        feature: &str,
        value: FeatureValue,
    ) -> Result<(), CurationError> {
        set_checked_feature(&self.layer, self.sink.as_ref(), doc, store, id, feature, value)
    }

    /// Instances of this layer overlapping `range`.
    pub fn select<'a>(&self, store: &'a AnnotationStore, range: Offsets) -> Selection<'a> {
        store.select(self.layer.id, SelectMode::Overlapping(range))
    }
}

pub(crate) fn set_checked_feature(
    layer: &Layer,
    sink: &dyn EventSink,
    doc: &DocumentContext,
    store: &mut AnnotationStore,
    id: AnnotationId,
    feature: &str,
    value: FeatureValue,
) -> Result<(), CurationError> {
    require_on_layer(layer, store, id)?;
    check_feature_value(layer, store, feature, &value)?;
    let old = store
        .set_feature(id, feature, value.clone())?
        .unwrap_or_default();
    if old != value {
        publish_or_warn(
            sink,
            AnnotationEvent::FeatureUpdated(
                doc.clone(),
                layer.id,
                id,
                feature.to_string(),
                old,
                value,
            ),
        );
    }
    Ok(())
}
