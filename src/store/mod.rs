//! Store module: one document's text plus its indexed annotation instances.
//!
//! # Module Organization
//!
//! - [`base`]: the [`AnnotationStore`] arena and its mutation operations
//! - [`select`]: [`Selection`], the lazy ordered view returned by [`AnnotationStore::select`]
//!
//! ```rust
//! use curation_core::{properties::{LayerId, Offsets}, store::{AnnotationStore, SelectMode}};
//!
//! let mut store = AnnotationStore::new("This is it");
//! let id = store.create(LayerId(1), 0, 4).unwrap();
//! let found: Vec<_> = store
//!     .select(LayerId(1), SelectMode::Overlapping(Offsets::new(2, 6)))
//!     .map(|a| a.id)
//!     .collect();
//! assert_eq!(found, vec![id]);
//! ```

mod base;
mod select;


pub use base::AnnotationStore;
pub use select::{SelectMode, Selection};
