use petgraph::{graphmap::GraphMap, Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::{
    error::CurationError,
    properties::{AnnotationId, LayerId, FEAT_SOURCE, FEAT_TARGET},
    schema::LayerRegistry,
    store::{AnnotationStore, SelectMode},
};

/// Connections between instances: edge `a -> b` carries every `(layer, connection)` that leads
/// from `a` to `b`. The connection is the relation instance or the link host.
pub type ConnectionGraph = GraphMap<AnnotationId, Vec<(LayerId, AnnotationId)>, Directed>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttachmentDirection {
    Incoming,
    Outgoing,
    Loop,
}

/// Something connected to a focal instance, seen from the focal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub direction: AttachmentDirection,
    pub layer: LayerId,
    pub connection: AnnotationId,
    /// The instance on the other end.
    pub endpoint: AnnotationId,
}

fn add_connection(
    graph: &mut ConnectionGraph,
    from: AnnotationId,
    to: AnnotationId,
    layer: LayerId,
    connection: AnnotationId,
) {
    if let Some(weight) = graph.edge_weight_mut(from, to) {
        if !weight.contains(&(layer, connection)) {
            weight.push((layer, connection));
        }
        return;
    }
    graph.add_edge(from, to, vec![(layer, connection)]);
}

/// Read the attachments of `focal` out of a graph holding its connections.
fn attachments_of(graph: &ConnectionGraph, focal: AnnotationId) -> Vec<Attachment> {
    if !graph.contains_node(focal) {
        return vec![];
    }
    let mut found = vec![];
    for target in graph.neighbors_directed(focal, Direction::Outgoing) {
        let direction = if target == focal {
            AttachmentDirection::Loop
        } else {
            AttachmentDirection::Outgoing
        };
        for (layer, connection) in graph.edge_weight(focal, target).into_iter().flatten() {
            found.push(Attachment {
                direction,
                layer: *layer,
                connection: *connection,
                endpoint: target,
            });
        }
    }
    for source in graph.neighbors_directed(focal, Direction::Incoming) {
        if source == focal {
            continue;
        }
        for (layer, connection) in graph.edge_weight(source, focal).into_iter().flatten() {
            found.push(Attachment {
                direction: AttachmentDirection::Incoming,
                layer: *layer,
                connection: *connection,
                endpoint: source,
            });
        }
    }
    found.sort();
    found
}

/// Relation instances of any relation layer that may connect to the focal's layer and have the
/// focal instance as source or target. One entry per relation.
pub fn attached_relations(
    registry: &LayerRegistry,
    store: &AnnotationStore,
    focal: AnnotationId,
) -> Result<Vec<Attachment>, CurationError> {
    let focal_layer = store.require(focal)?.layer;
    let mut graph = ConnectionGraph::new();
    graph.add_node(focal);
    for layer in registry.relation_layers_for(focal_layer) {
        for relation in store.select(layer.id, SelectMode::All) {
            let (Some(source), Some(target)) = (
                relation.ref_feature(FEAT_SOURCE),
                relation.ref_feature(FEAT_TARGET),
            ) else {
                continue;
            };
            if source == focal || target == focal {
                add_connection(&mut graph, source, target, layer.id, relation.id);
            }
        }
    }
    let found = attachments_of(&graph, focal);
    tracing::debug!(
        "[attached_relations] {focal}: {} attachments",
        found.len()
    );
    Ok(found)
}

/// Link-feature connections of the focal instance. Incoming: one entry per host linking to the
/// focal instance, however many slots it uses. Outgoing: one entry per distinct target of the
/// focal instance's own link features.
pub fn attached_links(
    registry: &LayerRegistry,
    store: &AnnotationStore,
    focal: AnnotationId,
) -> Result<Vec<Attachment>, CurationError> {
    let anno = store.require(focal)?;
    let mut graph = ConnectionGraph::new();
    graph.add_node(focal);

    for (host_layer, feature) in registry.link_features_targeting(anno.layer) {
        for host in store.select(host_layer.id, SelectMode::All) {
            if host.links(&feature.name).iter().any(|l| l.target == focal) {
                add_connection(&mut graph, host.id, focal, host_layer.id, host.id);
            }
        }
    }
    if let Some(layer) = registry.get(anno.layer) {
        for feature in layer.link_features() {
            for link in anno.links(&feature.name) {
                if store.contains(link.target) {
                    add_connection(&mut graph, focal, link.target, layer.id, focal);
                }
            }
        }
    }

    Ok(attachments_of(&graph, focal))
}
