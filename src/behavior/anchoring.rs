use super::{BehaviorContext, CreateRequest, LayerBehavior, MoveRequest, ValidationFinding};
use crate::{
    error::CurationError,
    properties::Offsets,
    schema::{AnchoringMode, Layer, LayerRegistry, Segmentation},
    store::{AnnotationStore, SelectMode},
};

/// Snaps span boundaries to the layer's anchoring granularity.
///
/// Segmentation layers and relation requests are left alone. Snapping is idempotent: a range that
/// is already aligned snaps to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnchoringBehavior;

impl AnchoringBehavior {
    /// The range `range` snaps to on `layer`, without touching the store.
    pub fn snap(
        registry: &LayerRegistry,
        layer: &Layer,
        store: &AnnotationStore,
        range: Offsets,
    ) -> Result<Offsets, CurationError> {
        if layer.is_segmentation() {
            return Ok(range);
        }
        let mode = layer.anchoring_mode;
        if range.is_empty() {
            return if mode.is_zero_width_allowed() {
                Ok(range)
            } else {
                Err(CurationError::IllegalPlacement(format!(
                    "zero-width span {range} is not allowed on layer '{}' ({mode:?})",
                    layer.name
                )))
            };
        }

        let (segmentation, single) = match mode {
            AnchoringMode::Characters => return Ok(range),
            AnchoringMode::SingleToken => (Segmentation::Token, true),
            AnchoringMode::Tokens => (Segmentation::Token, false),
            AnchoringMode::Sentences => (Segmentation::Sentence, false),
        };
        let grid = registry.segmentation_layer(segmentation).ok_or_else(|| {
            CurationError::IllegalPlacement(format!(
                "layer '{}' anchors to {segmentation:?} units but none are defined",
                layer.name
            ))
        })?;

        let mut units = store.select(grid.id, SelectMode::Overlapping(range));
        let first = units.next().ok_or_else(|| {
            CurationError::IllegalPlacement(format!(
                "no {segmentation:?} unit overlaps {range} on layer '{}'",
                layer.name
            ))
        })?;
        if single {
            return Ok(first.offsets());
        }
        let end = units.map(|u| u.end).fold(first.end, usize::max);
        Ok(Offsets::new(first.begin, end))
    }
}

impl LayerBehavior for AnchoringBehavior {
    fn name(&self) -> &'static str {
        "Anchoring"
    }

    fn on_create(
        &self,
        ctx: &BehaviorContext<'_>,
        mut request: CreateRequest,
    ) -> Result<CreateRequest, CurationError> {
        if request.endpoints.is_some() {
            return Ok(request);
        }
        request.range = Self::snap(ctx.registry, ctx.layer, ctx.store, request.range)?;
        Ok(request)
    }

    fn on_move(
        &self,
        ctx: &BehaviorContext<'_>,
        mut request: MoveRequest,
    ) -> Result<MoveRequest, CurationError> {
        request.range = Self::snap(ctx.registry, ctx.layer, ctx.store, request.range)?;
        Ok(request)
    }

    fn on_validate(&self, ctx: &BehaviorContext<'_>) -> Vec<ValidationFinding> {
        if ctx.layer.is_segmentation() || ctx.layer.anchoring_mode == AnchoringMode::Characters {
            return vec![];
        }
        ctx.store
            .select(ctx.layer.id, SelectMode::All)
            .filter_map(|anno| {
                let offsets = anno.offsets();
                match Self::snap(ctx.registry, ctx.layer, ctx.store, offsets) {
                    Ok(snapped) if snapped == offsets => None,
                    Ok(snapped) => Some(ValidationFinding::new(
                        anno.id,
                        format!(
                            "{offsets} is not aligned to {:?} anchoring (expected {snapped})",
                            ctx.layer.anchoring_mode
                        ),
                    )),
                    Err(e) => Some(ValidationFinding::new(anno.id, e.to_string())),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::LayerId,
        schema::OverlapMode,
        tests::helpers::*,
    };
    use test_log::test;

    fn snap(layer: LayerId, begin: usize, end: usize) -> Result<Offsets, CurationError> {
        let registry = test_registry();
        let layer = registry.get(layer).unwrap();
        AnchoringBehavior::snap(
            &registry,
            &layer,
            &tokenized_store(),
            Offsets::new(begin, end),
        )
    }

    #[test]
    fn test_tokens_expand_to_covering_tokens() {
        assert_eq!(snap(NAMED_ENTITY, 2, 6).unwrap(), Offsets::new(0, 7));
        assert_eq!(snap(NAMED_ENTITY, 11, 12).unwrap(), Offsets::new(10, 14));
    }

    #[test]
    fn test_single_token_takes_first_token() {
        assert_eq!(snap(POS, 2, 6).unwrap(), Offsets::new(0, 4));
    }

    #[test]
    fn test_sentences() {
        let registry = test_registry();
        registry.register(
            Layer::span(LayerId(20), "Quote").with_anchoring(AnchoringMode::Sentences),
        );
        let layer = registry.get(LayerId(20)).unwrap();
        let store = tokenized_store();
        let snapped =
            AnchoringBehavior::snap(&registry, &layer, &store, Offsets::new(12, 18)).unwrap();
        assert_eq!(snapped, Offsets::new(0, 33));
    }

    #[test]
    fn test_zero_width_rejected_unless_characters() {
        assert!(matches!(
            snap(POS, 10, 10),
            Err(CurationError::IllegalPlacement(_))
        ));
        assert!(matches!(
            snap(NAMED_ENTITY, 10, 10),
            Err(CurationError::IllegalPlacement(_))
        ));
        assert_eq!(snap(EVENT, 10, 10).unwrap(), Offsets::new(10, 10));
    }

    #[test]
    fn test_no_unit_in_range() {
        // The gap between "This" and "is"
        assert!(matches!(
            snap(NAMED_ENTITY, 4, 5),
            Err(CurationError::IllegalPlacement(_))
        ));
    }

    #[test]
    fn test_segmentation_layers_are_exempt() {
        assert_eq!(snap(TOKEN, 1, 2).unwrap(), Offsets::new(1, 2));
    }

    #[test]
    fn test_snap_is_idempotent() {
        for layer in [NAMED_ENTITY, POS] {
            for (begin, end) in [(0, 1), (2, 6), (3, 20), (9, 33), (15, 17)] {
                let once = snap(layer, begin, end).unwrap();
                let twice = snap(layer, once.begin, once.end).unwrap();
                assert_eq!(once, twice, "layer {layer} [{begin},{end})");
            }
        }
    }

    #[test]
    fn test_validate_reports_misaligned() {
        let registry = test_registry();
        let layer = registry.get(NAMED_ENTITY).unwrap();
        let mut store = tokenized_store();
        let good = raw_span(&mut store, NAMED_ENTITY, (0, 7), None);
        let bad = raw_span(&mut store, NAMED_ENTITY, (1, 7), None);
        let ctx = BehaviorContext::new(&registry, &layer, &store);
        let findings = AnchoringBehavior.on_validate(&ctx);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].annotation, bad);
        assert_ne!(findings[0].annotation, good);
    }

    #[test]
    fn test_missing_grid_is_illegal() {
        let registry = LayerRegistry::from_layers([Layer::span(LayerId(2), "NE")
            .with_anchoring(AnchoringMode::Tokens)
            .with_overlap(OverlapMode::AnyOverlap)]);
        let layer = registry.get(LayerId(2)).unwrap();
        let store = AnnotationStore::new("abc");
        assert!(matches!(
            AnchoringBehavior::snap(&registry, &layer, &store, Offsets::new(0, 1)),
            Err(CurationError::IllegalPlacement(_))
        ));
    }
}
