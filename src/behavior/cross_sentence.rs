use super::{BehaviorContext, CreateRequest, LayerBehavior, MoveRequest, ValidationFinding};
use crate::{
    error::CurationError,
    properties::{AnnotationId, LayerId, Offsets, FEAT_SOURCE, FEAT_TARGET},
    render::{VComment, VCommentKind, VDocument},
    schema::Segmentation,
    store::{AnnotationStore, SelectMode},
    vid::Vid,
};

/// Rejects spans crossing a sentence boundary, and relations whose endpoints lie in different
/// sentences, on layers that set `cross_sentence = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossSentenceBehavior;

impl CrossSentenceBehavior {
    fn sentence_layer(ctx: &BehaviorContext<'_>) -> Option<LayerId> {
        if ctx.layer.cross_sentence || ctx.layer.is_segmentation() {
            return None;
        }
        ctx.registry
            .segmentation_layer(Segmentation::Sentence)
            .map(|l| l.id)
    }

    fn sentences(store: &AnnotationStore, sentence: LayerId, range: Offsets) -> Vec<AnnotationId> {
        // A zero-width range at a sentence end still belongs to that sentence.
        let lookup = if range.is_empty() && range.begin > 0 {
            Offsets::new(range.begin - 1, range.begin)
        } else {
            range
        };
        store
            .select(sentence, SelectMode::Overlapping(lookup))
            .map(|s| s.id)
            .collect()
    }

    /// Reason the placement crosses sentences, if it does.
    fn crossing(
        store: &AnnotationStore,
        sentence: LayerId,
        range: Offsets,
        endpoints: Option<(AnnotationId, AnnotationId)>,
    ) -> Option<String> {
        match endpoints {
            Some((source, target)) => {
                let source_range = store.get(source)?.offsets();
                let target_range = store.get(target)?.offsets();
                let a = Self::sentences(store, sentence, source_range);
                let b = Self::sentences(store, sentence, target_range);
                (a != b).then(|| {
                    format!("endpoints {source_range} and {target_range} lie in different sentences")
                })
            }
            None => {
                let hit = Self::sentences(store, sentence, range);
                (hit.len() > 1).then(|| format!("{range} crosses a sentence boundary"))
            }
        }
    }

    fn check(
        ctx: &BehaviorContext<'_>,
        range: Offsets,
        endpoints: Option<(AnnotationId, AnnotationId)>,
    ) -> Result<(), CurationError> {
        let Some(sentence) = Self::sentence_layer(ctx) else {
            return Ok(());
        };
        match Self::crossing(ctx.store, sentence, range, endpoints) {
            Some(reason) => Err(CurationError::IllegalPlacement(format!(
                "{reason}; layer '{}' does not allow crossing sentences",
                ctx.layer.name
            ))),
            None => Ok(()),
        }
    }
}

impl LayerBehavior for CrossSentenceBehavior {
    fn name(&self) -> &'static str {
        "CrossSentence"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn on_create(
        &self,
        ctx: &BehaviorContext<'_>,
        request: CreateRequest,
    ) -> Result<CreateRequest, CurationError> {
        Self::check(ctx, request.range, request.endpoints)?;
        Ok(request)
    }

    fn on_move(
        &self,
        ctx: &BehaviorContext<'_>,
        request: MoveRequest,
    ) -> Result<MoveRequest, CurationError> {
        Self::check(ctx, request.range, None)?;
        Ok(request)
    }

    fn on_validate(&self, ctx: &BehaviorContext<'_>) -> Vec<ValidationFinding> {
        let Some(sentence) = Self::sentence_layer(ctx) else {
            return vec![];
        };
        ctx.store
            .select(ctx.layer.id, SelectMode::All)
            .filter_map(|anno| {
                let endpoints = anno
                    .ref_feature(FEAT_SOURCE)
                    .zip(anno.ref_feature(FEAT_TARGET));
                Self::crossing(ctx.store, sentence, anno.offsets(), endpoints)
                    .map(|reason| ValidationFinding::new(anno.id, reason))
            })
            .collect()
    }

    fn on_render(&self, ctx: &BehaviorContext<'_>, vdoc: &mut VDocument) {
        for finding in self.on_validate(ctx) {
            vdoc.add_comment(VComment::new(
                Vid::new(finding.annotation).with_layer(ctx.layer.id),
                VCommentKind::Error,
                finding.message,
            ));
        }
    }
}
