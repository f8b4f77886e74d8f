//! # curation-core
//!
//! Layered, offset-anchored annotation of text by several annotators, with cross-annotator
//! comparison and merging into a single curated result.
//!
//! ## Overview
//!
//! Annotations live in an [`store::AnnotationStore`]: one text plus typed instances, each
//! attached to a layer of the schema ([`schema::LayerRegistry`]). Layers come in three kinds:
//!
//! - **Span** layers mark a range of text (named entities, part-of-speech tags, tokens, sentences)
//! - **Relation** layers connect a source and a target instance (dependencies, semantic relations)
//! - **Chain** layers string spans together (coreference)
//!
//! Every structural change goes through a layer adapter ([`adapter`]), which folds the request
//! through an ordered chain of [`behavior::LayerBehavior`]s (anchoring, overlap, cross-sentence)
//! before it touches the store. A request that violates a placement rule is rejected with
//! [`CurationError::IllegalPlacement`] and leaves the store as it was.
//!
//! ## Architecture
//!
//! - **[`properties`]**: annotation ids, offsets, feature values, the annotation instance
//! - **[`schema`]**: layer and feature definitions, the layer registry
//! - **[`store`]**: the per-document annotation store and ordered selections
//! - **[`vid`]**: visual ids addressing instances, features and link slots from a UI
//! - **[`behavior`]**: placement rules shared by all adapters
//! - **[`adapter`]**: span, relation, chain and segmentation adapters
//! - **[`diff`]**: cross-annotator comparison ([`diff::DiffEngine`])
//! - **[`curation`]**: merging into the curation store ([`curation::MergeEngine`]) and
//!   attachment lookup
//! - **[`render`]**: the visual object model handed to a renderer
//! - **[`event`]**: mutation events and the sinks that receive them
//! - **[`document`]**: document/user contexts and the document service
//! - **[`config`]**: schema providers (TOML)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use curation_core::{
//!     adapter::SpanAdapter,
//!     document::DocumentContext,
//!     event::NullSink,
//!     properties::{LayerId, Offsets},
//!     schema::{AnchoringMode, Feature, Layer, LayerRegistry},
//!     store::AnnotationStore,
//! };
//!
//! # fn main() -> Result<(), curation_core::CurationError> {
//! let registry = LayerRegistry::from_layers([
//!     Layer::token(LayerId(0)),
//!     Layer::span(LayerId(1), "NamedEntity")
//!         .with_anchoring(AnchoringMode::Tokens)
//!         .with_feature(Feature::string("value")),
//! ]);
//!
//! let mut store = AnnotationStore::new("Alice met Bob");
//! for (begin, end) in [(0, 5), (6, 9), (10, 13)] {
//!     store.create(LayerId(0), begin, end)?;
//! }
//!
//! let doc = DocumentContext::new("doc", "alice");
//! let entities = SpanAdapter::for_layer(&registry, LayerId(1), Arc::new(NullSink))?;
//! // Requests are snapped to token boundaries
//! let id = entities.create(&doc, &mut store, 1, 4)?;
//! entities.set_feature(&doc, &mut store, id, "value", "PER".into())?;
//! assert_eq!(store.require(id)?.offsets(), Offsets::new(0, 5));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the complete library
//! - **logging**: `init_logging()` for binaries embedding the library

pub mod adapter;
pub mod behavior;
pub mod config;
pub mod curation;
pub mod diff;
pub mod document;
pub mod error;
pub mod event;
pub mod properties;
pub mod render;
pub mod schema;
pub mod store;
#[cfg(test)]
mod tests;
pub mod vid;

pub use error::*;

/// Install a `tracing` subscriber filtered by `RUST_LOG`. Repeated calls are ignored.
#[cfg(feature = "logging")]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}
