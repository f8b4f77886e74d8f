//! Curation: merging annotator work into the curation store and inspecting what is connected to
//! a focal annotation.
//!
//! - [`merge`]: [`MergeEngine`] with per-instance (`merge_span`, `merge_relation`, `merge_slot`)
//!   and batch (`merge_all`, `merge_all_into`) operations
//! - [`attachment`]: incoming/outgoing/loop connections of an instance through relations and
//!   link features

pub mod attachment;
pub mod merge;

pub use attachment::{attached_links, attached_relations, Attachment, AttachmentDirection};
pub use merge::{MergeEngine, MergeOutcome, MergeReport, SharedStore};
