//! Ordered, lazy selection over one layer of an [`AnnotationStore`].

use std::{cmp::Reverse, collections::btree_set, ops::Bound};

use super::AnnotationStore;
use crate::properties::{Annotation, AnnotationId, Offsets};

/// Index key giving the `(begin, -length)` order: at equal begin the longest instance comes first,
/// and the id breaks remaining ties.
pub(super) type IndexKey = (usize, Reverse<usize>, AnnotationId);

/// Selection predicate relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Every instance of the layer.
    All,
    /// Instances lying completely within the window.
    Covering(Offsets),
    /// Instances sharing at least one character with the window (see [`Offsets::overlaps`]).
    Overlapping(Offsets),
}

impl SelectMode {
    pub fn matches(&self, offsets: &Offsets) -> bool {
        match self {
            SelectMode::All => true,
            SelectMode::Covering(window) => window.covers(offsets),
            SelectMode::Overlapping(window) => window.overlaps(offsets),
        }
    }

    pub(super) fn bounds(&self) -> (Bound<IndexKey>, Bound<IndexKey>) {
        match self {
            SelectMode::All => (Bound::Unbounded, Bound::Unbounded),
            SelectMode::Covering(w) => (
                Bound::Included((w.begin, Reverse(usize::MAX), AnnotationId(0))),
                Bound::Included((w.end, Reverse(0), AnnotationId(u64::MAX))),
            ),
            // Instances starting before the window may still reach into it, so only the upper end
            // can be bounded.
            SelectMode::Overlapping(w) => (
                Bound::Unbounded,
                Bound::Included((w.end, Reverse(0), AnnotationId(u64::MAX))),
            ),
        }
    }
}

/// Lazy iterator over the instances of one layer, ordered by `(begin, -length, id)`.
///
/// The selection borrows the store, so it cannot outlive a mutation. It is restartable: [`Clone`]
/// it before consuming, or call [`Selection::restart`].
#[derive(Clone)]
pub struct Selection<'a> {
    store: &'a AnnotationStore,
    mode: SelectMode,
    origin: Option<btree_set::Range<'a, IndexKey>>,
    inner: Option<btree_set::Range<'a, IndexKey>>,
}

impl<'a> Selection<'a> {
    pub(super) fn new(
        store: &'a AnnotationStore,
        mode: SelectMode,
        range: Option<btree_set::Range<'a, IndexKey>>,
    ) -> Self {
        Selection {
            store,
            mode,
            origin: range.clone(),
            inner: range,
        }
    }

    pub fn mode(&self) -> SelectMode {
        self.mode
    }

    /// A fresh selection positioned at the first match.
    pub fn restart(&self) -> Selection<'a> {
        Selection {
            store: self.store,
            mode: self.mode,
            origin: self.origin.clone(),
            inner: self.origin.clone(),
        }
    }
}

impl<'a> Iterator for Selection<'a> {
    type Item = &'a Annotation;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;
        for (_, _, id) in inner.by_ref() {
            if let Some(anno) = self.store.get(*id) {
                if self.mode.matches(&anno.offsets()) {
                    return Some(anno);
                }
            }
        }
        None
    }
}
