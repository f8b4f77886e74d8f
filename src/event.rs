use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    document::DocumentContext,
    error::CurationError,
    properties::{AnnotationId, FeatureValue, LayerId, Offsets},
};

/// Change notifications emitted by the layer adapters and the merge engine after a mutation has
/// been applied to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationEvent {
    /// Context, layer, new instance, its offsets
    SpanCreated(DocumentContext, LayerId, AnnotationId, Offsets),
    /// Context, layer, instance, old offsets, new offsets
    SpanMoved(DocumentContext, LayerId, AnnotationId, Offsets, Offsets),
    /// Context, layer, removed instance, its offsets
    SpanDeleted(DocumentContext, LayerId, AnnotationId, Offsets),
    /// Context, layer, relation, source endpoint, target endpoint
    RelationCreated(
        DocumentContext,
        LayerId,
        AnnotationId,
        AnnotationId,
        AnnotationId,
    ),
    RelationDeleted(DocumentContext, LayerId, AnnotationId),
    /// Context, layer, from, to
    ChainLinked(DocumentContext, LayerId, AnnotationId, AnnotationId),
    ChainUnlinked(DocumentContext, LayerId, AnnotationId, AnnotationId),
    /// Context, layer, trimmed unit, new unit
    UnitSplit(DocumentContext, LayerId, AnnotationId, AnnotationId),
    /// Context, layer, resized neighbour, removed unit
    UnitsMerged(DocumentContext, LayerId, AnnotationId, AnnotationId),
    /// Context, layer, instance, feature name, old value, new value
    FeatureUpdated(
        DocumentContext,
        LayerId,
        AnnotationId,
        String,
        FeatureValue,
        FeatureValue,
    ),
    /// Source context, target context, layer, source position, target instance, target position
    AnnotationMerged(
        DocumentContext,
        DocumentContext,
        LayerId,
        Offsets,
        AnnotationId,
        Offsets,
    ),
}

impl AnnotationEvent {
    /// The document/user the event was applied to.
    pub fn context(&self) -> &DocumentContext {
        match self {
            AnnotationEvent::SpanCreated(ctx, ..)
            | AnnotationEvent::SpanMoved(ctx, ..)
            | AnnotationEvent::SpanDeleted(ctx, ..)
            | AnnotationEvent::RelationCreated(ctx, ..)
            | AnnotationEvent::RelationDeleted(ctx, ..)
            | AnnotationEvent::ChainLinked(ctx, ..)
            | AnnotationEvent::ChainUnlinked(ctx, ..)
            | AnnotationEvent::UnitSplit(ctx, ..)
            | AnnotationEvent::UnitsMerged(ctx, ..)
            | AnnotationEvent::FeatureUpdated(ctx, ..) => ctx,
            AnnotationEvent::AnnotationMerged(_, target, ..) => target,
        }
    }

    pub fn layer(&self) -> LayerId {
        match self {
            AnnotationEvent::SpanCreated(_, layer, ..)
            | AnnotationEvent::SpanMoved(_, layer, ..)
            | AnnotationEvent::SpanDeleted(_, layer, ..)
            | AnnotationEvent::RelationCreated(_, layer, ..)
            | AnnotationEvent::RelationDeleted(_, layer, ..)
            | AnnotationEvent::ChainLinked(_, layer, ..)
            | AnnotationEvent::ChainUnlinked(_, layer, ..)
            | AnnotationEvent::UnitSplit(_, layer, ..)
            | AnnotationEvent::UnitsMerged(_, layer, ..)
            | AnnotationEvent::FeatureUpdated(_, layer, ..) => *layer,
            AnnotationEvent::AnnotationMerged(_, _, layer, ..) => *layer,
        }
    }

    /// The instance the event is primarily about.
    pub fn annotation(&self) -> AnnotationId {
        match self {
            AnnotationEvent::SpanCreated(_, _, id, ..)
            | AnnotationEvent::SpanMoved(_, _, id, ..)
            | AnnotationEvent::SpanDeleted(_, _, id, ..)
            | AnnotationEvent::RelationCreated(_, _, id, ..)
            | AnnotationEvent::RelationDeleted(_, _, id)
            | AnnotationEvent::ChainLinked(_, _, id, _)
            | AnnotationEvent::ChainUnlinked(_, _, id, _)
            | AnnotationEvent::UnitSplit(_, _, id, _)
            | AnnotationEvent::UnitsMerged(_, _, id, _)
            | AnnotationEvent::FeatureUpdated(_, _, id, ..) => *id,
            AnnotationEvent::AnnotationMerged(_, _, _, _, id, _) => *id,
        }
    }
}

impl Display for AnnotationEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            AnnotationEvent::SpanCreated(..) => "SpanCreated",
            AnnotationEvent::SpanMoved(..) => "SpanMoved",
            AnnotationEvent::SpanDeleted(..) => "SpanDeleted",
            AnnotationEvent::RelationCreated(..) => "RelationCreated",
            AnnotationEvent::RelationDeleted(..) => "RelationDeleted",
            AnnotationEvent::ChainLinked(..) => "ChainLinked",
            AnnotationEvent::ChainUnlinked(..) => "ChainUnlinked",
            AnnotationEvent::UnitSplit(..) => "UnitSplit",
            AnnotationEvent::UnitsMerged(..) => "UnitsMerged",
            AnnotationEvent::FeatureUpdated(..) => "FeatureUpdated",
            AnnotationEvent::AnnotationMerged(..) => "AnnotationMerged",
        };
        write!(
            f,
            "{name}({}, layer {}, annotation {})",
            self.context(),
            self.layer(),
            self.annotation()
        )
    }
}

/// Receiver of [`AnnotationEvent`]s. Publication failures are never fatal to the mutation that
/// produced the event; see [`publish_or_warn`].
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AnnotationEvent) -> Result<(), CurationError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: AnnotationEvent) -> Result<(), CurationError> {
        Ok(())
    }
}

impl EventSink for UnboundedSender<AnnotationEvent> {
    fn publish(&self, event: AnnotationEvent) -> Result<(), CurationError> {
        self.send(event)?;
        Ok(())
    }
}

/// Collects events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<AnnotationEvent>>>);

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<AnnotationEvent> {
        self.0.lock().clone()
    }

    /// Drain the collected events.
    pub fn take(&self) -> Vec<AnnotationEvent> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: AnnotationEvent) -> Result<(), CurationError> {
        self.0.lock().push(event);
        Ok(())
    }
}

/// Publish `event`, logging instead of propagating a failure.
pub fn publish_or_warn(sink: &dyn EventSink, event: AnnotationEvent) {
    let label = event.to_string();
    if let Err(e) = sink.publish(event) {
        tracing::warn!("[EventSink::publish] dropped {label}: {e}");
    }
}
