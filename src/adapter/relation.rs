use std::sync::Arc;

use super::{require_on_layer, span::set_checked_feature};
use crate::{
    behavior::{BehaviorChain, BehaviorContext, CreateRequest, ValidationFinding},
    document::DocumentContext,
    error::CurationError,
    event::{publish_or_warn, AnnotationEvent, EventSink},
    properties::{Annotation, AnnotationId, FeatureValue, LayerId, Offsets, FEAT_SOURCE, FEAT_TARGET},
    schema::{Layer, LayerKind, LayerRegistry},
    store::{AnnotationStore, SelectMode, Selection},
};

/// Adapter for relation layers. A relation instance holds `source`/`target` references and takes
/// the offsets of its target endpoint.
#[derive(Clone)]
pub struct RelationAdapter {
    layer: Arc<Layer>,
    registry: LayerRegistry,
    behaviors: BehaviorChain,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RelationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelationAdapter({}, {:?})", self.layer, self.behaviors)
    }
}

impl RelationAdapter {
    pub fn new(
        layer: Arc<Layer>,
        registry: LayerRegistry,
        behaviors: BehaviorChain,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CurationError> {
        if layer.kind != LayerKind::Relation {
            return Err(CurationError::IllegalPlacement(format!(
                "layer '{}' is not a relation layer",
                layer.name
            )));
        }
        Ok(RelationAdapter {
            layer,
            registry,
            behaviors,
            sink,
        })
    }

    pub fn for_layer(
        registry: &LayerRegistry,
        id: LayerId,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CurationError> {
        RelationAdapter::new(
            registry.require(id)?,
            registry.clone(),
            BehaviorChain::standard(),
            sink,
        )
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    fn endpoint(&self, store: &AnnotationStore, id: AnnotationId) -> Result<Offsets, CurationError> {
        let anno = store.get(id).ok_or_else(|| {
            CurationError::IllegalPlacement(format!("relation endpoint {id} does not exist"))
        })?;
        if let Some(expected) = self.layer.endpoint_layer {
            if anno.layer != expected {
                return Err(CurationError::IllegalPlacement(format!(
                    "endpoint {id} lies on layer {}, but '{}' connects layer {expected}",
                    anno.layer, self.layer.name
                )));
            }
        }
        Ok(anno.offsets())
    }

    /// Validate a relation between `source` and `target` without touching the store.
    pub fn plan_create(
        &self,
        store: &AnnotationStore,
        source: AnnotationId,
        target: AnnotationId,
    ) -> Result<Offsets, CurationError> {
        self.endpoint(store, source)?;
        let range = self.endpoint(store, target)?;
        let ctx = BehaviorContext::new(&self.registry, &self.layer, store);
        let request = self
            .behaviors
            .on_create(&ctx, CreateRequest::relation(range, source, target))?;
        Ok(request.range)
    }

    #[tracing::instrument(skip(self, store))]
    pub fn create(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        source: AnnotationId,
        target: AnnotationId,
    ) -> Result<AnnotationId, CurationError> {
        let range = self.plan_create(store, source, target)?;
        let id = store.create(self.layer.id, range.begin, range.end)?;
        store.set_feature(id, FEAT_SOURCE, FeatureValue::Ref(source))?;
        store.set_feature(id, FEAT_TARGET, FeatureValue::Ref(target))?;
        tracing::debug!(
            "[RelationAdapter::create] {} {id}: {source} -> {target}",
            self.layer.name
        );
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::RelationCreated(doc.clone(), self.layer.id, id, source, target),
        );
        Ok(id)
    }

    #[tracing::instrument(skip(self, store))]
    pub fn delete(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
        id: AnnotationId,
    ) -> Result<Annotation, CurationError> {
        require_on_layer(&self.layer, store, id)?;
        let removed = store.remove(id)?;
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::RelationDeleted(doc.clone(), self.layer.id, id),
        );
        Ok(removed)
    }

    /// Relations of this layer whose target endpoint overlaps `range`.
    pub fn select<'a>(&self, store: &'a AnnotationStore, range: Offsets) -> Selection<'a> {
        store.select(self.layer.id, SelectMode::Overlapping(range))
    }

    /// Relations of this layer from `source` to `target`.
    pub fn find(
        &self,
        store: &AnnotationStore,
        source: AnnotationId,
        target: AnnotationId,
    ) -> Vec<AnnotationId> {
        let Some(target_range) = store.get(target).map(|t| t.offsets()) else {
            return vec![];
        };
        store
            .select(self.layer.id, SelectMode::Covering(target_range))
            .filter(|r| {
                r.ref_feature(FEAT_SOURCE) == Some(source)
                    && r.ref_feature(FEAT_TARGET) == Some(target)
            })
            .map(|r| r.id)
            .collect()
    }

    fn is_dangling(store: &AnnotationStore, anno: &Annotation) -> bool {
        [FEAT_SOURCE, FEAT_TARGET]
            .iter()
            .any(|f| anno.ref_feature(f).map(|e| !store.contains(e)).unwrap_or(true))
    }

    /// Dangling endpoints plus every behavior's findings. Never fails.
    pub fn validate(&self, store: &AnnotationStore) -> Vec<ValidationFinding> {
        let mut findings: Vec<ValidationFinding> = store
            .select(self.layer.id, SelectMode::All)
            .filter(|r| Self::is_dangling(store, r))
            .map(|r| ValidationFinding::new(r.id, "relation endpoint is missing"))
            .collect();
        let ctx = BehaviorContext::new(&self.registry, &self.layer, store);
        findings.extend(self.behaviors.on_validate(&ctx));
        findings
    }

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

    /// Remove relations whose endpoints no longer exist. Returns the removed ids.
    #[tracing::instrument(skip(self, store))]
    pub fn delete_dangling(
        &self,
        doc: &DocumentContext,
        store: &mut AnnotationStore,
    ) -> Vec<AnnotationId> {
        let dangling: Vec<AnnotationId> = store
            .select(self.layer.id, SelectMode::All)
            .filter(|r| Self::is_dangling(store, r))
            .map(|r| r.id)
            .collect();
        let mut removed = vec![];
        for id in dangling {
            match self.delete(doc, store, id) {
                Ok(_) => removed.push(id),
                Err(e) => tracing::warn!("[RelationAdapter::delete_dangling] {id}: {e}"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter::SpanAdapter, event::MemorySink, tests::helpers::*, vid::Vid};
    use test_log::test;

    fn adapters(sink: &MemorySink) -> (SpanAdapter, RelationAdapter) {
        let registry = test_registry();
        (
            SpanAdapter::for_layer(&registry, NAMED_ENTITY, Arc::new(sink.clone())).unwrap(),
            RelationAdapter::for_layer(&registry, RELATION, Arc::new(sink.clone())).unwrap(),
        )
    }

    #[test]
    fn test_create_takes_target_offsets() {
        let sink = MemorySink::new();
        let (ne, rel) = adapters(&sink);
        let mut store = tokenized_store();
        let a = ne.create(&ctx("alice"), &mut store, 0, 4).unwrap();
        let b = ne.create(&ctx("alice"), &mut store, 16, 23).unwrap();
        let r = rel.create(&ctx("alice"), &mut store, a, b).unwrap();

        let relation = store.get(r).unwrap();
        assert_eq!(relation.offsets(), Offsets::new(16, 23));
        assert_eq!(relation.ref_feature(FEAT_SOURCE), Some(a));
        assert_eq!(rel.find(&store, a, b), vec![r]);
        assert!(rel.find(&store, b, a).is_empty());
        assert_eq!(rel.select(&store, Offsets::new(0, 10)).count(), 0);
        assert!(matches!(
            sink.events().last(),
            Some(AnnotationEvent::RelationCreated(..))
        ));
    }

    #[test]
    fn test_endpoint_layer_enforced() {
        let sink = MemorySink::new();
        let (ne, rel) = adapters(&sink);
        let mut store = tokenized_store();
        let a = ne.create(&ctx("alice"), &mut store, 0, 4).unwrap();
        let token = token_at(&store, (5, 7));
        let before = store.len();
        assert!(matches!(
            rel.create(&ctx("alice"), &mut store, a, token),
            Err(CurationError::IllegalPlacement(_))
        ));
        assert!(matches!(
            rel.create(&ctx("alice"), &mut store, a, AnnotationId(999)),
            Err(CurationError::IllegalPlacement(_))
        ));
        assert_eq!(store.len(), before);
    }

    #[test]
    fn test_dependency_may_not_cross_sentences() {
        let registry = test_registry();
        let dep = RelationAdapter::for_layer(&registry, DEPENDENCY, Arc::new(MemorySink::new()))
            .unwrap();
        let mut store = tokenized_store();
        let this = token_at(&store, (0, 4));
        let test = token_at(&store, (10, 14));
        let here = token_at(&store, (28, 32));
        assert!(dep.create(&ctx("alice"), &mut store, this, test).is_ok());
        assert!(matches!(
            dep.create(&ctx("alice"), &mut store, this, here),
            Err(CurationError::IllegalPlacement(_))
        ));
    }

    #[test]
    fn test_dangling_relations_reported_and_removed() {
        let sink = MemorySink::new();
        let (ne, rel) = adapters(&sink);
        let mut store = tokenized_store();
        let a = ne.create(&ctx("alice"), &mut store, 0, 4).unwrap();
        let b = ne.create(&ctx("alice"), &mut store, 5, 7).unwrap();
        let r = rel.create(&ctx("alice"), &mut store, a, b).unwrap();
        rel.set_feature(&ctx("alice"), &mut store, r, "label", "knows".into())
            .unwrap();
        assert!(rel.validate(&store).is_empty());

        ne.delete(&ctx("alice"), &mut store, &Vid::new(a)).unwrap();
        assert!(store.contains(r));
        let findings = rel.validate(&store);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].annotation, r);

        assert_eq!(rel.delete_dangling(&ctx("alice"), &mut store), vec![r]);
        assert!(!store.contains(r));
        assert!(rel.validate(&store).is_empty());
    }

    #[test]
    fn test_wrong_adapter_kind() {
        let registry = test_registry();
        assert!(RelationAdapter::for_layer(&registry, NAMED_ENTITY, Arc::new(MemorySink::new()))
            .is_err());
        assert!(SpanAdapter::for_layer(&registry, RELATION, Arc::new(MemorySink::new())).is_err());
    }
}
