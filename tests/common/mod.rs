//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use curation_core::{
    document::DocumentContext,
    properties::{AnnotationId, FeatureValue, LayerId, Offsets},
    schema::{AnchoringMode, Feature, Layer, LayerRegistry, Multiplicity},
    store::AnnotationStore,
};

pub const TOKEN: LayerId = LayerId(0);
pub const SENTENCE: LayerId = LayerId(1);
pub const NAMED_ENTITY: LayerId = LayerId(10);
pub const POS: LayerId = LayerId(11);
pub const RELATION: LayerId = LayerId(12);
pub const EVENT: LayerId = LayerId(13);
pub const COREF: LayerId = LayerId(14);

/// Three sentences, fifteen whitespace-separated tokens.
pub const TEXT: &str = "Alice met Bob in Paris . Carol saw Dave at noon . Eve called Frank later .";

#[allow(dead_code)]
pub fn registry() -> LayerRegistry {
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
            .without_cross_sentence()
            .with_feature(Feature::string("label")),
        Layer::span(EVENT, "Event")
            .with_anchoring(AnchoringMode::SingleToken)
            .with_feature(Feature::string("type"))
            .with_feature(Feature::link("participants", Some(NAMED_ENTITY)))
            .with_feature(
                Feature::link("trigger", None).with_multiplicity(Multiplicity::Single),
            ),
        Layer::chain(COREF, "Coreference").with_feature(Feature::string("referenceType")),
    ])
}

/// Token offsets of [`TEXT`].
#[allow(dead_code)]
pub fn tokens() -> Vec<Offsets> {
    let mut found = vec![];
    let mut start = None;
    for (idx, c) in TEXT.char_indices() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(idx),
            (true, Some(begin)) => {
                found.push(Offsets::new(begin, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        found.push(Offsets::new(begin, TEXT.len()));
    }
    found
}

/// Sentence offsets of [`TEXT`]: each sentence ends with its `.` token.
#[allow(dead_code)]
pub fn sentences() -> Vec<Offsets> {
    let mut found = vec![];
    let mut begin = None;
    for token in tokens() {
        let begin_at = *begin.get_or_insert(token.begin);
        if &TEXT[token.begin..token.end] == "." {
            found.push(Offsets::new(begin_at, token.end));
            begin = None;
        }
    }
    found
}

/// A store over [`TEXT`] holding the token and sentence segmentation.
#[allow(dead_code)]
pub fn tokenized_store() -> AnnotationStore {
    let mut store = AnnotationStore::new(TEXT);
    for token in tokens() {
        store.create(TOKEN, token.begin, token.end).unwrap();
    }
    for sentence in sentences() {
        store.create(SENTENCE, sentence.begin, sentence.end).unwrap();
    }
    store
}

/// Offsets of the `n`th token.
#[allow(dead_code)]
pub fn token(n: usize) -> Offsets {
    tokens()[n]
}

#[allow(dead_code)]
pub fn annotator(user: &str) -> DocumentContext {
    DocumentContext::new("story", user)
}

#[allow(dead_code)]
pub fn curator() -> DocumentContext {
    DocumentContext::curation("story")
}

/// Create a labeled named entity directly in the store.
#[allow(dead_code)]
pub fn entity(store: &mut AnnotationStore, offsets: Offsets, value: &str) -> AnnotationId {
    let id = store
        .create(NAMED_ENTITY, offsets.begin, offsets.end)
        .unwrap();
    store
        .set_feature(id, "value", FeatureValue::from(value))
        .unwrap();
    id
}
