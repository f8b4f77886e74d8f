//! Pluggable per-layer behaviors.
//!
//! A [`BehaviorChain`] is an ordered list of [`LayerBehavior`]s, sorted once by priority. Adapters
//! fold placement requests through the chain before touching the store: every behavior may rewrite
//! the requested range (e.g. snapping it to tokens) or refuse it with
//! [`CurationError::IllegalPlacement`]. The same chain validates existing instances and decorates
//! rendered output.
//!
//! Behaviors only ever read the store; a failed request leaves it untouched.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::{
    error::CurationError,
    properties::{AnnotationId, Offsets},
    render::VDocument,
    schema::{Layer, LayerRegistry},
    store::AnnotationStore,
};

pub mod anchoring;
pub mod cross_sentence;
pub mod overlap;

pub use anchoring::AnchoringBehavior;
pub use cross_sentence::CrossSentenceBehavior;
pub use overlap::OverlapBehavior;

/// Everything a behavior may consult: the schema, the layer being edited and the store.
#[derive(Clone, Copy)]
pub struct BehaviorContext<'a> {
    pub registry: &'a LayerRegistry,
    pub layer: &'a Layer,
    pub store: &'a AnnotationStore,
}

impl<'a> BehaviorContext<'a> {
    pub fn new(registry: &'a LayerRegistry, layer: &'a Layer, store: &'a AnnotationStore) -> Self {
        BehaviorContext {
            registry,
            layer,
            store,
        }
    }
}

/// A request to place a new instance. Relation requests carry their endpoints; the range is then
/// the target endpoint's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateRequest {
    pub range: Offsets,
    pub endpoints: Option<(AnnotationId, AnnotationId)>,
}

impl CreateRequest {
    pub fn span(begin: usize, end: usize) -> Self {
        CreateRequest {
            range: Offsets::new(begin, end),
            endpoints: None,
        }
    }

    pub fn relation(range: Offsets, source: AnnotationId, target: AnnotationId) -> Self {
        CreateRequest {
            range,
            endpoints: Some((source, target)),
        }
    }
}

/// A request to move an existing instance to a new range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub id: AnnotationId,
    pub range: Offsets,
}

/// A validation problem. Findings are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub message: String,
    pub annotation: AnnotationId,
}

impl ValidationFinding {
    pub fn new<S: Into<String>>(annotation: AnnotationId, message: S) -> Self {
        ValidationFinding {
            message: message.into(),
            annotation,
        }
    }
}

pub trait LayerBehavior: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower priorities run first.
    fn priority(&self) -> i32 {
        0
    }

    fn on_create(
        &self,
        _ctx: &BehaviorContext<'_>,
        request: CreateRequest,
    ) -> Result<CreateRequest, CurationError> {
        Ok(request)
    }

    fn on_move(
        &self,
        _ctx: &BehaviorContext<'_>,
        request: MoveRequest,
    ) -> Result<MoveRequest, CurationError> {
        Ok(request)
    }

    fn on_validate(&self, _ctx: &BehaviorContext<'_>) -> Vec<ValidationFinding> {
        vec![]
    }

    fn on_render(&self, _ctx: &BehaviorContext<'_>, _vdoc: &mut VDocument) {}
}

/// Ordered list of behaviors, stably sorted by [`LayerBehavior::priority`].
#[derive(Clone, Default)]
pub struct BehaviorChain(Vec<Arc<dyn LayerBehavior>>);

impl fmt::Debug for BehaviorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|b| b.name()))
            .finish()
    }
}

impl BehaviorChain {
    pub fn new(mut behaviors: Vec<Arc<dyn LayerBehavior>>) -> Self {
        behaviors.sort_by_key(|b| b.priority());
        BehaviorChain(behaviors)
    }

    /// Anchoring, overlap and cross-sentence checks.
    pub fn standard() -> Self {
        BehaviorChain::new(vec![
            Arc::new(AnchoringBehavior),
            Arc::new(OverlapBehavior),
            Arc::new(CrossSentenceBehavior),
        ])
    }

    pub fn with(mut self, behavior: Arc<dyn LayerBehavior>) -> Self {
        self.0.push(behavior);
        self.0.sort_by_key(|b| b.priority());
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn on_create(
        &self,
        ctx: &BehaviorContext<'_>,
        request: CreateRequest,
    ) -> Result<CreateRequest, CurationError> {
        self.0
            .iter()
            .try_fold(request, |request, behavior| behavior.on_create(ctx, request))
    }

    pub fn on_move(
        &self,
        ctx: &BehaviorContext<'_>,
        request: MoveRequest,
    ) -> Result<MoveRequest, CurationError> {
        self.0
            .iter()
            .try_fold(request, |request, behavior| behavior.on_move(ctx, request))
    }

    pub fn on_validate(&self, ctx: &BehaviorContext<'_>) -> Vec<ValidationFinding> {
        self.0
            .iter()
            .flat_map(|behavior| behavior.on_validate(ctx))
            .collect()
    }

    pub fn on_render(&self, ctx: &BehaviorContext<'_>, vdoc: &mut VDocument) {
        for behavior in self.0.iter() {
            behavior.on_render(ctx, vdoc);
        }
    }
}
