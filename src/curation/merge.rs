use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    adapter::{
        check_feature_value, require_on_layer, span::set_checked_feature, RelationAdapter,
        SpanAdapter,
    },
    document::{DocumentContext, DocumentService},
    error::CurationError,
    event::{publish_or_warn, AnnotationEvent, EventSink},
    properties::{
        Annotation, AnnotationId, FeatureValue, LayerId, LinkWithRole, Offsets, FEAT_SOURCE,
        FEAT_TARGET,
    },
    schema::{Layer, LayerKind, LayerRegistry, Multiplicity},
    store::{AnnotationStore, SelectMode},
    vid::Vid,
};

/// A curation target shared between merging threads. Only one merge writes at a time.
pub type SharedStore = Arc<Mutex<AnnotationStore>>;

/// Successful merge results. `AlreadyMerged` and `MergeConflict` are reported as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Created(AnnotationId),
    Updated(AnnotationId),
}

impl MergeOutcome {
    /// The target instance that was created or updated.
    pub fn id(&self) -> AnnotationId {
        match self {
            MergeOutcome::Created(id) | MergeOutcome::Updated(id) => *id,
        }
    }
}

/// Tally of a batch merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub created: usize,
    pub updated: usize,
    pub already_merged: usize,
    pub conflicting: usize,
    pub other_errors: usize,
    /// One message per unexpected failure.
    pub messages: Vec<String>,
}

impl MergeReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.already_merged + self.conflicting + self.other_errors
    }

    /// Count one result. A closed document aborts the batch.
    fn record(
        &mut self,
        source: AnnotationId,
        result: Result<MergeOutcome, CurationError>,
    ) -> Result<(), CurationError> {
        match result {
            Ok(MergeOutcome::Created(_)) => self.created += 1,
            Ok(MergeOutcome::Updated(_)) => self.updated += 1,
            Err(CurationError::AlreadyMerged(_)) => self.already_merged += 1,
            Err(CurationError::MergeConflict(_)) => self.conflicting += 1,
            Err(e @ CurationError::DocumentClosed(_)) => return Err(e),
            Err(e) => {
                self.other_errors += 1;
                self.messages.push(format!("{source}: {e}"));
            }
        }
        Ok(())
    }
}

/// How an existing target instance relates to a source instance at the same position.
enum FeatureMatch {
    Identical,
    /// No contradicting values; these source features are unset in the target.
    Compatible(Vec<(String, FeatureValue)>),
    Conflicting(String),
}

/// Only the source's own features are compared. A target carrying additional values (e.g. a
/// label the curator added) is `Identical` to a source without them: merging would add nothing.
fn compare_features(source: &Annotation, target: &Annotation) -> FeatureMatch {
    let mut missing = vec![];
    for (name, value) in source.primitive_features() {
        match target.feature(name) {
            None => missing.push((name.to_string(), value.clone())),
            Some(existing) if existing == value => {}
            Some(existing) => {
                return FeatureMatch::Conflicting(format!(
                    "{target} has {name}={existing:?}, source {source} has {value:?}"
                ))
            }
        }
    }
    if missing.is_empty() {
        FeatureMatch::Identical
    } else {
        FeatureMatch::Compatible(missing)
    }
}

/// Target instances of `layer` exactly at `offsets`.
fn at_position(store: &AnnotationStore, layer: LayerId, offsets: Offsets) -> Vec<AnnotationId> {
    store
        .select_at(layer, offsets)
        .into_iter()
        .map(|a| a.id)
        .collect()
}

/// Schema-check the primitive features of `source` before anything is written to the target.
fn checked_primitives(
    layer: &Layer,
    target_store: &AnnotationStore,
    source: &Annotation,
) -> Result<Vec<(String, FeatureValue)>, CurationError> {
    source
        .primitive_features()
        .into_iter()
        .map(|(name, value)| {
            check_feature_value(layer, target_store, name, value)?;
            Ok((name.to_string(), value.clone()))
        })
        .collect()
}

/// Merges annotations from annotator stores into a curation store.
///
/// Instances are never copied by id: every cross-store reference (relation endpoints, link
/// targets) is re-resolved by layer and position in the target. All placement rules of the
/// target layer are re-applied through the layer adapters.
#[derive(Clone)]
pub struct MergeEngine {
    registry: LayerRegistry,
    documents: Arc<dyn DocumentService>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MergeEngine({:?})", self.registry)
    }
}

impl MergeEngine {
    pub fn new(
        registry: LayerRegistry,
        documents: Arc<dyn DocumentService>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        MergeEngine {
            registry,
            documents,
            sink,
        }
    }

    fn check_open(&self, target_ctx: &DocumentContext) -> Result<(), CurationError> {
        if self.documents.is_closed(target_ctx) {
            return Err(CurationError::DocumentClosed(target_ctx.to_string()));
        }
        Ok(())
    }

    fn publish_merged(
        &self,
        source_ctx: &DocumentContext,
        target_ctx: &DocumentContext,
        layer: LayerId,
        source: Offsets,
        target_store: &AnnotationStore,
        target: AnnotationId,
    ) {
        let target_offsets = target_store
            .get(target)
            .map(Annotation::offsets)
            .unwrap_or_default();
        publish_or_warn(
            self.sink.as_ref(),
            AnnotationEvent::AnnotationMerged(
                source_ctx.clone(),
                target_ctx.clone(),
                layer,
                source,
                target,
                target_offsets,
            ),
        );
    }

    /// Reconcile `source` with the target instances already at its position.
    fn merge_into_existing(
        &self,
        layer: &Layer,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        source: &Annotation,
        candidates: Vec<AnnotationId>,
    ) -> Result<MergeOutcome, CurationError> {
        let mut compatible = None;
        let mut conflicts = vec![];
        for id in candidates {
            match compare_features(source, target_store.require(id)?) {
                FeatureMatch::Identical => {
                    return Err(CurationError::AlreadyMerged(format!(
                        "{} {} is already present as {id}",
                        layer.name,
                        source.offsets()
                    )))
                }
                FeatureMatch::Compatible(missing) => {
                    compatible.get_or_insert((id, missing));
                }
                FeatureMatch::Conflicting(message) => conflicts.push(message),
            }
        }
        let Some((id, missing)) = compatible else {
            return Err(CurationError::MergeConflict(conflicts.join("; ")));
        };
        for (name, value) in missing {
            set_checked_feature(
                layer,
                self.sink.as_ref(),
                target_ctx,
                target_store,
                id,
                &name,
                value,
            )?;
        }
        tracing::debug!("[MergeEngine::merge_into_existing] updated {id} from {source}");
        Ok(MergeOutcome::Updated(id))
    }

    /// Link values of `source` whose targets can be found by position in the target store.
    fn resolved_links(
        &self,
        layer: &Layer,
        source_store: &AnnotationStore,
        target_store: &AnnotationStore,
        source: &Annotation,
    ) -> Vec<(String, FeatureValue)> {
        let mut resolved = vec![];
        for feature in layer.link_features() {
            let mut links: Vec<LinkWithRole> = source
                .links(&feature.name)
                .iter()
                .filter_map(|link| {
                    let original = source_store.get(link.target)?;
                    match at_position(target_store, original.layer, original.offsets()).as_slice()
                    {
                        [found] => Some(LinkWithRole::new(link.role.clone(), *found)),
                        _ => {
                            tracing::debug!(
                                "[MergeEngine::resolved_links] {} target {original} not resolvable",
                                feature.name
                            );
                            None
                        }
                    }
                })
                .collect();
            if feature.multiplicity == Multiplicity::Single {
                links.truncate(1);
            }
            if !links.is_empty() {
                resolved.push((feature.name.clone(), FeatureValue::Links(links)));
            }
        }
        resolved
    }

    /// Find the target counterpart of a source instance used as endpoint or link target, merging
    /// it first if it is missing. Spans created on the way are pushed to `created`.
    fn resolve_or_merge(
        &self,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        source_id: AnnotationId,
        created: &mut Vec<AnnotationId>,
    ) -> Result<AnnotationId, CurationError> {
        let original = source_store.require(source_id)?;
        let (layer, offsets) = (original.layer, original.offsets());
        let mut found = at_position(target_store, layer, offsets);
        if found.is_empty() {
            match self.merge_span(
                source_ctx,
                source_store,
                layer,
                target_ctx,
                target_store,
                source_id,
            ) {
                Ok(MergeOutcome::Created(id)) => created.push(id),
                Ok(MergeOutcome::Updated(_)) | Err(CurationError::AlreadyMerged(_)) => {}
                Err(e) => return Err(e),
            }
            found = at_position(target_store, layer, offsets);
        }
        match found.as_slice() {
            [id] => Ok(*id),
            [] => Err(CurationError::NotFound(format!(
                "no counterpart for {original} in {target_ctx}"
            ))),
            _ => Err(CurationError::MergeConflict(format!(
                "{original} is stacked in {target_ctx}, endpoint is ambiguous"
            ))),
        }
    }

    /// Remove spans merged as endpoints or link targets of a merge that failed afterwards, newest
    /// first.
    fn discard_created(
        &self,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        created: &[AnnotationId],
    ) {
        for id in created.iter().rev() {
            let Some(layer) = target_store.get(*id).map(|a| a.layer) else {
                continue;
            };
            let removed = SpanAdapter::for_layer(&self.registry, layer, self.sink.clone())
                .and_then(|adapter| adapter.delete(target_ctx, target_store, &Vid::new(*id)));
            match removed {
                Ok(_) => tracing::debug!("[MergeEngine::discard_created] removed {id}"),
                Err(e) => tracing::warn!("[MergeEngine::discard_created] could not remove {id}: {e}"),
            }
        }
    }

    /// Merge span (or chain link) `source_id` into the target store.
    #[tracing::instrument(skip(self, source_store, target_store))]
    pub fn merge_span(
        &self,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        layer: LayerId,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        source_id: AnnotationId,
    ) -> Result<MergeOutcome, CurationError> {
        self.check_open(target_ctx)?;
        let adapter = SpanAdapter::for_layer(&self.registry, layer, self.sink.clone())?;
        let source = require_on_layer(adapter.layer(), source_store, source_id)?;
        let offsets = source.offsets();
        let primitives = checked_primitives(adapter.layer(), target_store, source)?;

        let existing = at_position(target_store, layer, offsets);
        let outcome = if !existing.is_empty() {
            self.merge_into_existing(adapter.layer(), target_ctx, target_store, source, existing)?
        } else {
            let planned = adapter.plan_create(target_store, offsets.begin, offsets.end)?;
            if planned != offsets {
                return Err(CurationError::MergeConflict(format!(
                    "{source} would be anchored at {planned} in {target_ctx}"
                )));
            }
            let links = self.resolved_links(adapter.layer(), source_store, target_store, source);
            let id = adapter.create(target_ctx, target_store, offsets.begin, offsets.end)?;
            for (name, value) in primitives.into_iter().chain(links) {
                if let Err(e) = adapter.set_feature(target_ctx, target_store, id, &name, value) {
                    adapter.delete(target_ctx, target_store, &Vid::new(id))?;
                    return Err(e);
                }
            }
            MergeOutcome::Created(id)
        };

        tracing::debug!(
            "[MergeEngine::merge_span] {source_ctx} {source} -> {target_ctx}: {outcome:?}"
        );
        self.publish_merged(source_ctx, target_ctx, layer, offsets, target_store, outcome.id());
        Ok(outcome)
    }

    /// Merge relation `source_id` into the target store, merging missing endpoints first.
    /// Endpoints merged by this call are removed again when the relation itself is rejected.
    #[tracing::instrument(skip(self, source_store, target_store))]
    pub fn merge_relation(
        &self,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        layer: LayerId,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        source_id: AnnotationId,
    ) -> Result<MergeOutcome, CurationError> {
        self.check_open(target_ctx)?;
        let adapter = RelationAdapter::for_layer(&self.registry, layer, self.sink.clone())?;
        let relation = require_on_layer(adapter.layer(), source_store, source_id)?;
        let primitives = checked_primitives(adapter.layer(), target_store, relation)?;

        let mut created = vec![];
        let outcome = match self.relation_into_target(
            &adapter,
            source_ctx,
            source_store,
            target_ctx,
            target_store,
            relation,
            primitives,
            &mut created,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_created(target_ctx, target_store, &created);
                return Err(e);
            }
        };

        tracing::debug!(
            "[MergeEngine::merge_relation] {source_ctx} {relation} -> {target_ctx}: {outcome:?}"
        );
        self.publish_merged(
            source_ctx,
            target_ctx,
            layer,
            relation.offsets(),
            target_store,
            outcome.id(),
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn relation_into_target(
        &self,
        adapter: &RelationAdapter,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        relation: &Annotation,
        primitives: Vec<(String, FeatureValue)>,
        created: &mut Vec<AnnotationId>,
    ) -> Result<MergeOutcome, CurationError> {
        let endpoint = |feature: &str| {
            relation.ref_feature(feature).ok_or_else(|| {
                CurationError::NotFound(format!("relation {relation} has no {feature} endpoint"))
            })
        };
        let (source_end, target_end) = (endpoint(FEAT_SOURCE)?, endpoint(FEAT_TARGET)?);

        let source_end = self.resolve_or_merge(
            source_ctx,
            source_store,
            target_ctx,
            target_store,
            source_end,
            created,
        )?;
        let target_end = self.resolve_or_merge(
            source_ctx,
            source_store,
            target_ctx,
            target_store,
            target_end,
            created,
        )?;

        let existing = adapter.find(target_store, source_end, target_end);
        if !existing.is_empty() {
            return self.merge_into_existing(
                adapter.layer(),
                target_ctx,
                target_store,
                relation,
                existing,
            );
        }
        let id = adapter.create(target_ctx, target_store, source_end, target_end)?;
        for (name, value) in primitives {
            if let Err(e) = adapter.set_feature(target_ctx, target_store, id, &name, value) {
                adapter.delete(target_ctx, target_store, id)?;
                return Err(e);
            }
        }
        Ok(MergeOutcome::Created(id))
    }

    /// Merge the link at `slot` of `feature` on source host `host_id` into the target instance
    /// that matches the host by position and features.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, source_store, target_store))]
    pub fn merge_slot(
        &self,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        layer: LayerId,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        host_id: AnnotationId,
        feature: &str,
        slot: usize,
    ) -> Result<MergeOutcome, CurationError> {
        self.check_open(target_ctx)?;
        let layer_def = self.registry.require(layer)?;
        let feature_def = layer_def.require_feature(feature)?.clone();
        if !feature_def.is_link() {
            return Err(CurationError::InvalidFeature(format!(
                "feature '{feature}' of '{}' is not a link feature",
                layer_def.name
            )));
        }
        let host = require_on_layer(&layer_def, source_store, host_id)?;
        let link = host.links(feature).get(slot).cloned().ok_or_else(|| {
            CurationError::NotFound(format!("{host} has no slot {slot} in '{feature}'"))
        })?;
        let host_features = host.primitive_features();
        let target_host = target_store
            .select_at(layer, host.offsets())
            .into_iter()
            .find(|t| t.primitive_features() == host_features)
            .map(|t| t.id)
            .ok_or_else(|| {
                CurationError::NotFound(format!("{host} has not been merged into {target_ctx}"))
            })?;

        let mut created = vec![];
        let link_target = self.resolve_or_merge(
            source_ctx,
            source_store,
            target_ctx,
            target_store,
            link.target,
            &mut created,
        )?;
        let mut links = target_store.require(target_host)?.links(feature).to_vec();
        if links
            .iter()
            .any(|l| l.role == link.role && l.target == link_target)
        {
            return Err(CurationError::AlreadyMerged(format!(
                "slot {slot} of '{feature}' on {host} is already present on {target_host}"
            )));
        }
        let merged = LinkWithRole::new(link.role, link_target);
        match feature_def.multiplicity {
            Multiplicity::Single => links = vec![merged],
            Multiplicity::Array => links.push(merged),
        }
        if let Err(e) = set_checked_feature(
            &layer_def,
            self.sink.as_ref(),
            target_ctx,
            target_store,
            target_host,
            feature,
            FeatureValue::Links(links),
        ) {
            self.discard_created(target_ctx, target_store, &created);
            return Err(e);
        }

        self.publish_merged(
            source_ctx,
            target_ctx,
            layer,
            host.offsets(),
            target_store,
            target_host,
        );
        Ok(MergeOutcome::Updated(target_host))
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_one(
        &self,
        kind: LayerKind,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        layer: LayerId,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
        source_id: AnnotationId,
    ) -> Result<MergeOutcome, CurationError> {
        match kind {
            LayerKind::Relation => self.merge_relation(
                source_ctx,
                source_store,
                layer,
                target_ctx,
                target_store,
                source_id,
            ),
            LayerKind::Span | LayerKind::Chain => self.merge_span(
                source_ctx,
                source_store,
                layer,
                target_ctx,
                target_store,
                source_id,
            ),
        }
    }

    /// Merge every source instance of `layer`. Individual failures are tallied, only a closed
    /// target document fails the call.
    #[tracing::instrument(skip(self, source_store, target_store))]
    pub fn merge_all(
        &self,
        source_ctx: &DocumentContext,
        source_store: &AnnotationStore,
        layer: LayerId,
        target_ctx: &DocumentContext,
        target_store: &mut AnnotationStore,
    ) -> Result<MergeReport, CurationError> {
        self.check_open(target_ctx)?;
        let kind = self.registry.require(layer)?.kind;
        let ids: Vec<AnnotationId> = source_store
            .select(layer, SelectMode::All)
            .map(|a| a.id)
            .collect();

        let mut report = MergeReport::default();
        for id in ids {
            let result = self.merge_one(
                kind,
                source_ctx,
                source_store,
                layer,
                target_ctx,
                target_store,
                id,
            );
            report.record(id, result)?;
        }
        tracing::info!(
            "[MergeEngine::merge_all] {source_ctx} -> {target_ctx}, layer {layer}: \
             {} created, {} updated, {} already merged, {} conflicting, {} failed",
            report.created,
            report.updated,
            report.already_merged,
            report.conflicting,
            report.other_errors
        );
        Ok(report)
    }

    /// Merge several annotators into one shared target. Each source runs on its own thread and
    /// takes the target lock per instance, so when two sources contend for the same position the
    /// winner depends on scheduling. Reports are returned in source order.
    pub fn merge_all_into(
        &self,
        target: &SharedStore,
        target_ctx: &DocumentContext,
        layer: LayerId,
        sources: &[(DocumentContext, &AnnotationStore)],
    ) -> Result<Vec<MergeReport>, CurationError> {
        self.check_open(target_ctx)?;
        let kind = self.registry.require(layer)?.kind;

        std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter()
                .map(|(source_ctx, source_store)| {
                    scope.spawn(move || {
                        let ids: Vec<AnnotationId> = source_store
                            .select(layer, SelectMode::All)
                            .map(|a| a.id)
                            .collect();
                        let mut report = MergeReport::default();
                        for id in ids {
                            let result = {
                                let mut guard = target.lock();
                                self.merge_one(
                                    kind,
                                    source_ctx,
                                    source_store,
                                    layer,
                                    target_ctx,
                                    &mut guard,
                                    id,
                                )
                            };
                            report.record(id, result)?;
                        }
                        Ok::<_, CurationError>(report)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(report) => report,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}
