use std::collections::BTreeSet;

use super::{BehaviorContext, CreateRequest, LayerBehavior, MoveRequest, ValidationFinding};
use crate::{
    error::CurationError,
    properties::{Annotation, AnnotationId, Offsets, FEAT_SOURCE, FEAT_TARGET},
    render::{VComment, VCommentKind, VDocument},
    schema::{LayerKind, OverlapMode},
    store::SelectMode,
    vid::Vid,
};

/// Enforces the layer's [`OverlapMode`].
///
/// For spans, stacking means another instance at exactly the same offsets and overlapping means
/// sharing at least one character. For relations, stacking means the same source and target, and
/// overlapping means sharing exactly one endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clash {
    Stacking,
    Overlap,
}

fn endpoints(anno: &Annotation) -> Option<(AnnotationId, AnnotationId)> {
    Some((anno.ref_feature(FEAT_SOURCE)?, anno.ref_feature(FEAT_TARGET)?))
}

impl OverlapBehavior {
    fn span_clash(a: Offsets, b: Offsets) -> Option<Clash> {
        if a == b {
            Some(Clash::Stacking)
        } else if a.overlaps(&b) {
            Some(Clash::Overlap)
        } else {
            None
        }
    }

    fn relation_clash(
        a: (AnnotationId, AnnotationId),
        b: (AnnotationId, AnnotationId),
    ) -> Option<Clash> {
        match (a.0 == b.0, a.1 == b.1) {
            (true, true) => Some(Clash::Stacking),
            (true, false) | (false, true) => Some(Clash::Overlap),
            (false, false) => None,
        }
    }

    fn forbidden(mode: OverlapMode, clash: Clash) -> bool {
        match clash {
            Clash::Stacking => !mode.allows_stacking(),
            Clash::Overlap => !mode.allows_overlap(),
        }
    }

    /// The first existing instance (other than `exclude`) a placement would clash with in a way
    /// the layer forbids.
    fn find_violation(
        ctx: &BehaviorContext<'_>,
        request: &CreateRequest,
        exclude: Option<AnnotationId>,
    ) -> Option<(AnnotationId, Clash)> {
        let mode = ctx.layer.overlap_mode;
        if mode == OverlapMode::AnyOverlap || ctx.layer.is_segmentation() {
            return None;
        }
        if let Some(pair) = request.endpoints {
            return ctx
                .store
                .select(ctx.layer.id, SelectMode::All)
                .filter(|a| Some(a.id) != exclude)
                .filter_map(|a| Some((a.id, Self::relation_clash(pair, endpoints(a)?)?)))
                .find(|(_, clash)| Self::forbidden(mode, *clash));
        }
        ctx.store
            .select(ctx.layer.id, SelectMode::Overlapping(request.range))
            .filter(|a| Some(a.id) != exclude)
            .filter_map(|a| Some((a.id, Self::span_clash(request.range, a.offsets())?)))
            .find(|(_, clash)| Self::forbidden(mode, *clash))
    }

    fn violation_error(
        ctx: &BehaviorContext<'_>,
        other: AnnotationId,
        clash: Clash,
    ) -> CurationError {
        let what = match clash {
            Clash::Stacking => "stacking",
            Clash::Overlap => "overlapping",
        };
        CurationError::IllegalPlacement(format!(
            "{what} with {other} is not allowed on layer '{}' ({:?})",
            ctx.layer.name, ctx.layer.overlap_mode
        ))
    }
}

impl LayerBehavior for OverlapBehavior {
    fn name(&self) -> &'static str {
        "Overlap"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn on_create(
        &self,
        ctx: &BehaviorContext<'_>,
        request: CreateRequest,
    ) -> Result<CreateRequest, CurationError> {
        match Self::find_violation(ctx, &request, None) {
            Some((other, clash)) => Err(Self::violation_error(ctx, other, clash)),
            None => Ok(request),
        }
    }

    fn on_move(
        &self,
        ctx: &BehaviorContext<'_>,
        request: MoveRequest,
    ) -> Result<MoveRequest, CurationError> {
        let candidate = CreateRequest {
            range: request.range,
            endpoints: ctx.store.get(request.id).and_then(endpoints),
        };
        match Self::find_violation(ctx, &candidate, Some(request.id)) {
            Some((other, clash)) => Err(Self::violation_error(ctx, other, clash)),
            None => Ok(request),
        }
    }

    fn on_validate(&self, ctx: &BehaviorContext<'_>) -> Vec<ValidationFinding> {
        let mode = ctx.layer.overlap_mode;
        if mode == OverlapMode::AnyOverlap || ctx.layer.is_segmentation() {
            return vec![];
        }
        let is_relation = ctx.layer.kind == LayerKind::Relation;
        let instances: Vec<&Annotation> = ctx.store.select(ctx.layer.id, SelectMode::All).collect();
        let mut flagged = BTreeSet::new();
        let mut findings = vec![];
        for (i, a) in instances.iter().enumerate() {
            for b in instances.iter().skip(i + 1) {
                let clash = if is_relation {
                    endpoints(a)
                        .zip(endpoints(b))
                        .and_then(|(ea, eb)| Self::relation_clash(ea, eb))
                } else {
                    Self::span_clash(a.offsets(), b.offsets())
                };
                let Some(clash) = clash else {
                    continue;
                };
                if !Self::forbidden(mode, clash) {
                    continue;
                }
                for (x, y) in [(a, b), (b, a)] {
                    if flagged.insert(x.id) {
                        findings.push(ValidationFinding::new(
                            x.id,
                            format!("{clash:?} with {} violates {mode:?}", y.id),
                        ));
                    }
                }
            }
        }
        findings
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
