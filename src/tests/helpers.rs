//! Shared test utilities for adapter, diff and merge testing

use crate::{
    document::DocumentContext,
    properties::{AnnotationId, FeatureValue, LayerId, Offsets},
    schema::{AnchoringMode, Feature, Layer, LayerRegistry},
    store::AnnotationStore,
};

pub const TOKEN: LayerId = LayerId(0);
pub const SENTENCE: LayerId = LayerId(1);
pub const NAMED_ENTITY: LayerId = LayerId(2);
pub const POS: LayerId = LayerId(3);
pub const RELATION: LayerId = LayerId(4);
pub const DEPENDENCY: LayerId = LayerId(5);
pub const EVENT: LayerId = LayerId(6);
pub const COREF: LayerId = LayerId(7);

/// Two sentences, nine tokens.
pub const TEXT: &str = "This is a test. Another one here.";

pub const TOKENS: [(usize, usize); 9] = [
    (0, 4),
    (5, 7),
    (8, 9),
    (10, 14),
    (14, 15),
    (16, 23),
    (24, 27),
    (28, 32),
    (32, 33),
];

pub const SENTENCES: [(usize, usize); 2] = [(0, 15), (16, 33)];

/// The layer set used across unit tests:
///
/// - `NamedEntity`: token-anchored, string feature `value`
/// - `POS`: single-token, attached to `Token.pos`
/// - `Relation`: between named entities, string feature `label`
/// - `Dependency`: between tokens, may not cross sentences
/// - `Event`: character-anchored, link feature `participants` targeting named entities
/// - `Coreference`: chain layer, string feature `referenceType`
pub fn test_registry() -> LayerRegistry {
    LayerRegistry::from_layers([
        Layer::token(TOKEN),
        Layer::sentence(SENTENCE),
        Layer::span(NAMED_ENTITY, "NamedEntity")
            .with_anchoring(AnchoringMode::Tokens)
            .with_feature(Feature::string("value")),
        Layer::span(POS, "POS")
            .with_anchoring(AnchoringMode::SingleToken)
            .with_attach(TOKEN, "pos")
            .with_feature(Feature::string("PosValue")),
        Layer::relation(RELATION, "Relation", Some(NAMED_ENTITY))
            .with_feature(Feature::string("label")),
        Layer::relation(DEPENDENCY, "Dependency", Some(TOKEN))
            .without_cross_sentence()
            .with_feature(Feature::string("DependencyType")),
        Layer::span(EVENT, "Event")
            .with_feature(Feature::string("type"))
            .with_feature(Feature::link("participants", Some(NAMED_ENTITY))),
        Layer::chain(COREF, "Coreference").with_feature(Feature::string("referenceType")),
    ])
}

/// A store over [`TEXT`] holding the token and sentence segmentation.
pub fn tokenized_store() -> AnnotationStore {
    let mut store = AnnotationStore::new(TEXT);
    for (begin, end) in TOKENS {
        store.create(TOKEN, begin, end).unwrap();
    }
    for (begin, end) in SENTENCES {
        store.create(SENTENCE, begin, end).unwrap();
    }
    store
}

pub fn ctx(user: &str) -> DocumentContext {
    DocumentContext::new("doc1", user)
}

/// Create a span directly in the store, bypassing the behavior chain.
pub fn raw_span(
    store: &mut AnnotationStore,
    layer: LayerId,
    offsets: (usize, usize),
    value: Option<(&str, &str)>,
) -> AnnotationId {
    let id = store.create(layer, offsets.0, offsets.1).unwrap();
    if let Some((name, v)) = value {
        store.set_feature(id, name, FeatureValue::from(v)).unwrap();
    }
    id
}

pub fn token_at(store: &AnnotationStore, offsets: (usize, usize)) -> AnnotationId {
    store.select_at(TOKEN, Offsets::from(offsets))[0].id
}
