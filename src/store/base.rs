//! AnnotationStore: the arena owning one document's annotation instances.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use super::select::{IndexKey, SelectMode, Selection};
use crate::{
    error::CurationError,
    properties::{Annotation, AnnotationId, FeatureValue, LayerId, Offsets},
};

/// The text of one document version plus an indexed collection of annotation instances.
///
/// The store exclusively owns its instances. Other components hold [`AnnotationId`]s (or
/// [`crate::vid::Vid`]s) and re-resolve them on demand. Ids are issued from a monotonically
/// increasing counter and are never reused, which is what makes [`AnnotationStore::restore`]
/// safe.
///
/// The store itself is schema-agnostic: it checks offsets against the text but leaves anchoring,
/// attach and feature-shape rules to the layer adapters.
#[derive(Clone, Default, PartialEq)]
pub struct AnnotationStore {
    text: String,
    text_len: usize,
    annotations: BTreeMap<AnnotationId, Annotation>,
    index: BTreeMap<LayerId, BTreeSet<IndexKey>>,
    next_id: u64,
}

impl fmt::Debug for AnnotationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnnotationStore({} chars, {} annotations, {} layers)",
            self.text_len,
            self.annotations.len(),
            self.index.len()
        )
    }
}

fn index_key(anno: &Annotation) -> IndexKey {
    (anno.begin, Reverse(anno.end - anno.begin), anno.id)
}

impl AnnotationStore {
    pub fn new<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        let text_len = text.chars().count();
        AnnotationStore {
            text,
            text_len,
            ..Default::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the text in characters.
    pub fn text_len(&self) -> usize {
        self.text_len
    }

    /// The text under `[begin, end)` (character offsets). Out-of-range offsets are clamped.
    pub fn covered_text(&self, offsets: Offsets) -> &str {
        let byte_at = |char_offset: usize| {
            self.text
                .char_indices()
                .nth(char_offset)
                .map(|(b, _)| b)
                .unwrap_or(self.text.len())
        };
        let begin = byte_at(offsets.begin.min(self.text_len));
        let end = byte_at(offsets.end.min(self.text_len)).max(begin);
        &self.text[begin..end]
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    fn check_range(&self, begin: usize, end: usize) -> Result<(), CurationError> {
        if begin > end {
            return Err(CurationError::IllegalPlacement(format!(
                "begin {begin} lies after end {end}"
            )));
        }
        if end > self.text_len {
            return Err(CurationError::IllegalPlacement(format!(
                "range [{begin},{end}) exceeds text length {}",
                self.text_len
            )));
        }
        Ok(())
    }

    fn insert(&mut self, anno: Annotation) {
        self.index
            .entry(anno.layer)
            .or_default()
            .insert(index_key(&anno));
        self.annotations.insert(anno.id, anno);
    }

    pub fn create(
        &mut self,
        layer: LayerId,
        begin: usize,
        end: usize,
    ) -> Result<AnnotationId, CurationError> {
        self.create_with(layer, begin, end, BTreeMap::new())
    }

    pub fn create_with(
        &mut self,
        layer: LayerId,
        begin: usize,
        end: usize,
        features: BTreeMap<String, FeatureValue>,
    ) -> Result<AnnotationId, CurationError> {
        self.check_range(begin, end)?;
        let id = AnnotationId(self.next_id);
        self.next_id += 1;
        self.insert(Annotation {
            id,
            layer,
            begin,
            end,
            features,
        });
        tracing::trace!("[AnnotationStore::create] {id} on layer {layer} at [{begin},{end})");
        Ok(id)
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    pub fn require(&self, id: AnnotationId) -> Result<&Annotation, CurationError> {
        self.get(id)
            .ok_or_else(|| CurationError::NotFound(format!("annotation {id}")))
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.annotations.contains_key(&id)
    }

    pub fn remove(&mut self, id: AnnotationId) -> Result<Annotation, CurationError> {
        let anno = self
            .annotations
            .remove(&id)
            .ok_or_else(|| CurationError::NotFound(format!("annotation {id}")))?;
        if let Some(keys) = self.index.get_mut(&anno.layer) {
            keys.remove(&index_key(&anno));
            if keys.is_empty() {
                self.index.remove(&anno.layer);
            }
        }
        tracing::trace!("[AnnotationStore::remove] {anno}");
        Ok(anno)
    }

    /// Re-insert a previously removed instance under its original id.
    pub fn restore(&mut self, anno: Annotation) -> Result<AnnotationId, CurationError> {
        if anno.id.0 >= self.next_id {
            return Err(CurationError::NotFound(format!(
                "annotation id {} was never issued by this store",
                anno.id
            )));
        }
        if self.contains(anno.id) {
            return Err(CurationError::IllegalPlacement(format!(
                "annotation id {} is still in use",
                anno.id
            )));
        }
        self.check_range(anno.begin, anno.end)?;
        let id = anno.id;
        self.insert(anno);
        Ok(id)
    }

    /// Set a feature value, returning the previous one. Setting [`FeatureValue::Null`] clears the
    /// feature.
    pub fn set_feature<S: Into<String>>(
        &mut self,
        id: AnnotationId,
        name: S,
        value: FeatureValue,
    ) -> Result<Option<FeatureValue>, CurationError> {
        let anno = self
            .annotations
            .get_mut(&id)
            .ok_or_else(|| CurationError::NotFound(format!("annotation {id}")))?;
        let name = name.into();
        if value.is_null() {
            Ok(anno.features.remove(&name))
        } else {
            Ok(anno.features.insert(name, value))
        }
    }

    pub fn feature(&self, id: AnnotationId, name: &str) -> Option<&FeatureValue> {
        self.get(id).and_then(|a| a.feature(name))
    }

    /// Move an instance to a new range, keeping its id and features.
    pub fn set_range(
        &mut self,
        id: AnnotationId,
        begin: usize,
        end: usize,
    ) -> Result<Offsets, CurationError> {
        self.check_range(begin, end)?;
        let mut anno = self.remove(id)?;
        let old = anno.offsets();
        anno.begin = begin;
        anno.end = end;
        self.insert(anno);
        Ok(old)
    }

    /// Instances of `layer` matching `mode`, ordered by `(begin, -length)`.
    pub fn select(&self, layer: LayerId, mode: SelectMode) -> Selection<'_> {
        let valid_window = match mode {
            SelectMode::Covering(w) | SelectMode::Overlapping(w) => w.begin <= w.end,
            SelectMode::All => true,
        };
        let range = self
            .index
            .get(&layer)
            .filter(|_| valid_window)
            .map(|keys| keys.range(mode.bounds()));
        Selection::new(self, mode, range)
    }

    /// Instances of `layer` at exactly `offsets`.
    pub fn select_at(&self, layer: LayerId, offsets: Offsets) -> Vec<&Annotation> {
        self.select(layer, SelectMode::Covering(offsets))
            .filter(|a| a.offsets() == offsets)
            .collect()
    }

    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.index.keys().copied()
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Instances holding a reference (a `Ref` feature or a link) to `target`, as
    /// `(referrer, feature name)` pairs.
    pub fn referencing(&self, target: AnnotationId) -> Vec<(AnnotationId, String)> {
        let mut found = vec![];
        for anno in self.annotations.values() {
            for (name, value) in anno.features.iter() {
                let hit = match value {
                    FeatureValue::Ref(id) => *id == target,
                    FeatureValue::Links(links) => links.iter().any(|l| l.target == target),
                    _ => false,
                };
                if hit {
                    found.push((anno.id, name.clone()));
                }
            }
        }
        found
    }
}
