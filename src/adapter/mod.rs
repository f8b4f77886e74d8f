//! Layer adapters: the only code paths that create, move and delete annotation instances.
//!
//! # Module Organization
//!
//! - [`span`]: [`SpanAdapter`], span layers with anchoring and attach-feature handling
//! - [`relation`]: [`RelationAdapter`], source/target relations between instances
//! - [`chain`]: [`ChainAdapter`], linked chains of spans (e.g. coreference)
//! - [`segmentation`]: [`SegmentationAdapter`], splitting/merging/resizing token and sentence units
//!
//! Every adapter folds requests through a [`crate::behavior::BehaviorChain`] first and only then
//! mutates the store, so a failed operation leaves the store untouched. Events go to an injected
//! [`crate::event::EventSink`]; publication failures are logged, not propagated.

use crate::{
    error::CurationError,
    properties::{Annotation, AnnotationId, FeatureValue},
    schema::{FeatureShape, Layer},
    store::AnnotationStore,
};

pub mod chain;
pub mod relation;
pub mod segmentation;
pub mod span;

pub use chain::ChainAdapter;
pub use relation::RelationAdapter;
pub use segmentation::SegmentationAdapter;
pub use span::SpanAdapter;

/// Check `value` against the schema of `layer.feature`, including that link targets exist in
/// `store` and lie on the declared target layer.
pub fn check_feature_value(
    layer: &Layer,
    store: &AnnotationStore,
    feature: &str,
    value: &FeatureValue,
) -> Result<(), CurationError> {
    let definition = layer.require_feature(feature)?;
    definition.check_value(value)?;
    if let FeatureShape::Link { target_layer } = definition.shape {
        for link in value.as_links() {
            let target = store.get(link.target).ok_or_else(|| {
                CurationError::InvalidFeature(format!(
                    "link target {} of feature '{feature}' does not exist",
                    link.target
                ))
            })?;
            if let Some(expected) = target_layer {
                if target.layer != expected {
                    return Err(CurationError::InvalidFeature(format!(
                        "link target {} of feature '{feature}' lies on layer {}, expected {expected}",
                        link.target, target.layer
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Fail with `NotFound` unless `id` exists on `layer`.
pub(crate) fn require_on_layer<'a>(
    layer: &Layer,
    store: &'a AnnotationStore,
    id: AnnotationId,
) -> Result<&'a Annotation, CurationError> {
    let anno = store.require(id)?;
    if anno.layer != layer.id {
        return Err(CurationError::NotFound(format!(
            "annotation {id} is not on layer '{}'",
            layer.name
        )));
    }
    Ok(anno)
}
