use std::sync::Arc;

use super::require_on_layer;
use crate::{
    document::DocumentContext,
    error::CurationError,
    event::{publish_or_warn, AnnotationEvent, EventSink},
    properties::{Annotation, AnnotationId, Offsets},
    schema::Layer,
    store::{AnnotationStore, SelectMode},
};

/// Editing of segmentation units (tokens, sentences).
///
/// Units tile the text without overlapping, so editing one unit always touches a neighbour: a
/// split trims one unit and creates another, a delete folds the unit into a neighbour, and a move
/// drags the touching boundary of the adjacent unit along.
pub struct SegmentationAdapter {
    layer: Arc<Layer>,
    sink: Arc<dyn EventSink>,
}

impl SegmentationAdapter {
    pub fn new(layer: Arc<Layer>, sink: Arc<dyn EventSink>) -> Result<Self, CurationError> {
        if !layer.is_segmentation() {
            return Err(CurationError::IllegalPlacement(format!(
                "layer '{}' is not a segmentation layer",
                layer.name
            )));
        }
        Ok(SegmentationAdapter { layer, sink })
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// The unit strictly containing `offset`.
    pub fn unit_at<'a>(&self, store: &'a AnnotationStore, offset: usize) -> Option<&'a Annotation> {
        store
            .select(self.layer.id, SelectMode::All)
            .find(|u| u.offsets().strictly_contains(offset))
    }

    /// Nearest unit ending at or before `offset`.
    fn preceding<'a>(
        &self,
        store: &'a AnnotationStore,
        offset: usize,
        exclude: AnnotationId,
    ) -> Option<&'a Annotation> {
        store
            .select(self.layer.id, SelectMode::All)
            .filter(|u| u.id != exclude && u.end <= offset)
            .max_by_key(|u| (u.end, u.begin))
    }

    /// Nearest unit beginning at or after `offset`.
    fn following<'a>(
        &self,
        store: &'a AnnotationStore,
        offset: usize,
        exclude: AnnotationId,
    ) -> Option<&'a Annotation> {
        store
            .select(self.layer.id, SelectMode::All)
            .find(|u| u.id != exclude && u.begin >= offset)
    }

    /// Split the unit containing `offset` into `[begin, offset)` and `[offset, end)`. Returns the
    /// new unit.
    #[tracing::instrument(skip(self, store))]
    pub fn split(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        offset: usize,
    ) -> Result<AnnotationId, CurationError> {
        let unit = self.unit_at(store, offset).ok_or_else(|| {
            CurationError::IllegalPlacement(format!(
                "offset {offset} is not strictly inside a {} unit",
                self.layer.name
            ))
        })?;
        let (id, begin, end) = (unit.id, unit.begin, unit.end);

        let created = store.create(self.layer.id, offset, end)?;
        store.set_range(id, begin, offset)?;
        tracing::debug!(
            "[SegmentationAdapter::split] [{begin},{end}) at {offset} -> {id}, {created}"
        );
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::UnitSplit(doc.clone(), self.layer.id, id, created),
        );
        Ok(created)
    }

    /// Fold unit `id` into its preceding neighbour, or into its following neighbour when there is
    /// none before it. Returns the resized neighbour.
    #[tracing::instrument(skip(self, store))]
    pub fn delete(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
    ) -> Result<AnnotationId, CurationError> {
        let unit = require_on_layer(&self.layer, store, id)?.offsets();

        let (neighbour, range) = if let Some(prev) = self.preceding(store, unit.begin, id) {
            (prev.id, Offsets::new(prev.begin, unit.end))
        } else if let Some(next) = self.following(store, unit.end, id) {
            (next.id, Offsets::new(unit.begin, next.end))
        } else {
            return Err(CurationError::IllegalPlacement(format!(
                "last {} unit cannot be deleted",
                self.layer.name
            )));
        };

        store.remove(id)?;
        store.set_range(neighbour, range.begin, range.end)?;
        tracing::debug!("[SegmentationAdapter::delete] {id} {unit} merged into {neighbour} {range}");
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::UnitsMerged(doc.clone(), self.layer.id, neighbour, id),
        );
        Ok(neighbour)
    }

    /// Move exactly one boundary of unit `id`. A neighbour touching the moved boundary is resized
    /// with it.
    #[tracing::instrument(skip(self, store))]
    pub fn move_unit(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
        begin: usize,
        end: usize,
    ) -> Result<AnnotationId, CurationError> {
        let old = require_on_layer(&self.layer, store, id)?.offsets();
        let new = Offsets::new(begin, end);
        let begin_moved = old.begin != begin;
        let end_moved = old.end != end;
        if begin_moved && end_moved {
            return Err(CurationError::IllegalPlacement(
                "only one boundary of a unit can be moved at a time".to_string(),
            ));
        }
        if !begin_moved && !end_moved {
            return Ok(id);
        }
        if new.is_empty() || end > store.text_len() {
            return Err(CurationError::IllegalPlacement(format!(
                "moving {old} to {new} collapses or overruns the unit"
            )));
        }

        let mut resized = None;
        if begin_moved {
            if let Some(prev) = self.preceding(store, old.begin, id) {
                if prev.end == old.begin {
                    if begin <= prev.begin {
                        return Err(CurationError::IllegalPlacement(format!(
                            "moving the boundary to {begin} collapses neighbour {}",
                            prev.id
                        )));
                    }
                    resized = Some((prev.id, prev.offsets(), Offsets::new(prev.begin, begin)));
                } else if begin < prev.end {
                    return Err(CurationError::IllegalPlacement(format!(
                        "moving the boundary to {begin} overlaps neighbour {}",
                        prev.id
                    )));
                }
            }
        } else if let Some(next) = self.following(store, old.end, id) {
            if next.begin == old.end {
                if end >= next.end {
                    return Err(CurationError::IllegalPlacement(format!(
                        "moving the boundary to {end} collapses neighbour {}",
                        next.id
                    )));
                }
                resized = Some((next.id, next.offsets(), Offsets::new(end, next.end)));
            } else if end > next.begin {
                return Err(CurationError::IllegalPlacement(format!(
                    "moving the boundary to {end} overlaps neighbour {}",
                    next.id
                )));
            }
        }

        store.set_range(id, begin, end)?;
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::SpanMoved(doc.clone(), self.layer.id, id, old, new),
        );
        if let Some((neighbour, before, after)) = resized {
            store.set_range(neighbour, after.begin, after.end)?;
            publish_or_warn(
                self.sink.as_ref(),
                AnnotationEvent::SpanMoved(doc.clone(), self.layer.id, neighbour, before, after),
            );
        }
        Ok(id)
    }
}
