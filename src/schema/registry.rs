// Registry of layer definitions.
//
// Constructed and owned by the call site, then cloned (cheaply) into the components that need
// schema lookups. There is deliberately no process-wide instance.

use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

use super::{Feature, Layer, LayerKind, LayerKindSet, Segmentation};
use crate::{error::CurationError, properties::LayerId};

/// Thread-safe registry for layer definitions.
///
/// Layers are stored behind `Arc`, so lookups hand out cheap clones that stay valid even if the
/// registry is updated afterwards.
#[derive(Default)]
pub struct LayerRegistry(Arc<RwLock<BTreeMap<LayerId, Arc<Layer>>>>);

impl Clone for LayerRegistry {
    fn clone(&self) -> Self {
        LayerRegistry(self.0.clone())
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.read().values().map(|l| l.name.clone()))
            .finish()
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        LayerRegistry::default()
    }

    pub fn from_layers<I: IntoIterator<Item = Layer>>(layers: I) -> Self {
        let registry = LayerRegistry::new();
        for layer in layers {
            registry.register(layer);
        }
        registry
    }

    /// Register a layer definition
    ///
    /// If a layer with this id already exists, it will be overwritten and a log message emitted.
    pub fn register(&self, layer: Layer) {
        let mut writer = self.0.write();
        if let Some(existing) = writer.get(&layer.id) {
            tracing::info!(
                "[LayerRegistry::register] Overwriting existing layer {}: {} -> {}",
                layer.id,
                existing.name,
                layer.name
            );
        }
        writer.insert(layer.id, Arc::new(layer));
    }

    pub fn get(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.0.read().get(&id).cloned()
    }

    pub fn require(&self, id: LayerId) -> Result<Arc<Layer>, CurationError> {
        self.get(id)
            .ok_or_else(|| CurationError::NotFound(format!("layer {id} is not registered")))
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Layer>> {
        self.0.read().values().find(|l| l.name == name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Layer>> {
        self.0.read().values().cloned().collect()
    }

    pub fn layers_of_kind(&self, kinds: LayerKindSet) -> Vec<Arc<Layer>> {
        self.0
            .read()
            .values()
            .filter(|l| kinds.contains(l.kind))
            .cloned()
            .collect()
    }

    /// The layer providing the given segmentation grid, if any is registered.
    pub fn segmentation_layer(&self, segmentation: Segmentation) -> Option<Arc<Layer>> {
        self.0
            .read()
            .values()
            .find(|l| l.segmentation == Some(segmentation))
            .cloned()
    }

    /// Relation layers whose endpoints may be instances of `layer` (including layers with
    /// unconstrained endpoints).
    pub fn relation_layers_for(&self, layer: LayerId) -> Vec<Arc<Layer>> {
        self.0
            .read()
            .values()
            .filter(|l| l.kind == LayerKind::Relation)
            .filter(|l| l.endpoint_layer.map(|e| e == layer).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// `(host layer, feature)` pairs of link features that may point at instances of `layer`
    /// (including link features accepting any annotation).
    pub fn link_features_targeting(&self, layer: LayerId) -> Vec<(Arc<Layer>, Feature)> {
        let reader = self.0.read();
        let mut found = vec![];
        for host in reader.values() {
            for feature in host.link_features() {
                if feature.link_target_layer().map(|t| t == layer).unwrap_or(true) {
                    found.push((host.clone(), feature.clone()));
                }
            }
        }
        found
    }
}
