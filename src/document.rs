//! Document/session collaborator: which document and user a store belongs to, and whether it may
//! still be edited.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::Arc,
};

use crate::{error::CurationError, store::AnnotationStore};

/// Pseudo-user owning the curated (target) annotation set of a document.
pub const CURATION_USER: &str = "CURATION_USER";

/// `(document, user)` pair identifying one annotation set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentContext {
    pub document: String,
    pub user: String,
}

impl DocumentContext {
    pub fn new<D: Into<String>, U: Into<String>>(document: D, user: U) -> Self {
        DocumentContext {
            document: document.into(),
            user: user.into(),
        }
    }

    /// The curation target of `document`.
    pub fn curation<D: Into<String>>(document: D) -> Self {
        DocumentContext::new(document, CURATION_USER)
    }

    pub fn is_curation(&self) -> bool {
        self.user == CURATION_USER
    }
}

impl Display for DocumentContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.document, self.user)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentState {
    #[default]
    New,
    InProgress,
    /// Closed for editing.
    Finished,
}

pub trait DocumentService: Send + Sync {
    fn read(&self, ctx: &DocumentContext) -> Result<AnnotationStore, CurationError>;
    fn write(&self, ctx: &DocumentContext, store: &AnnotationStore) -> Result<(), CurationError>;
    fn state(&self, ctx: &DocumentContext) -> DocumentState;
    fn set_state(&self, ctx: &DocumentContext, state: DocumentState);

    fn is_closed(&self, ctx: &DocumentContext) -> bool {
        self.state(ctx) == DocumentState::Finished
    }
}

/// In-memory [`DocumentService`]. Clones share the same backing map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentService(
    Arc<RwLock<BTreeMap<DocumentContext, (Option<AnnotationStore>, DocumentState)>>>,
);

impl MemoryDocumentService {
    pub fn new() -> Self {
        MemoryDocumentService::default()
    }
}

impl DocumentService for MemoryDocumentService {
    fn read(&self, ctx: &DocumentContext) -> Result<AnnotationStore, CurationError> {
        self.0
            .read()
            .get(ctx)
            .and_then(|(store, _)| store.clone())
            .ok_or_else(|| CurationError::NotFound(format!("no annotation set for {ctx}")))
    }

    fn write(&self, ctx: &DocumentContext, store: &AnnotationStore) -> Result<(), CurationError> {
        let mut writer = self.0.write();
        let entry = writer.entry(ctx.clone()).or_default();
        if entry.1 == DocumentState::Finished {
            return Err(CurationError::DocumentClosed(ctx.to_string()));
        }
        entry.0 = Some(store.clone());
        if entry.1 == DocumentState::New {
            entry.1 = DocumentState::InProgress;
        }
        tracing::debug!("[MemoryDocumentService::write] {ctx}: {store:?}");
        Ok(())
    }

    fn state(&self, ctx: &DocumentContext) -> DocumentState {
        self.0
            .read()
            .get(ctx)
            .map(|(_, state)| *state)
            .unwrap_or_default()
    }

    fn set_state(&self, ctx: &DocumentContext, state: DocumentState) {
        self.0.write().entry(ctx.clone()).or_default().1 = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::LayerId;
    use test_log::test;

    #[test]
    fn test_write_read_and_close() {
        let service = MemoryDocumentService::new();
        let ctx = DocumentContext::new("doc", "alice");
        assert!(matches!(
            service.read(&ctx),
            Err(CurationError::NotFound(_))
        ));
        assert_eq!(service.state(&ctx), DocumentState::New);

        let mut store = AnnotationStore::new("This is it");
        store.create(LayerId(1), 0, 4).unwrap();
        service.write(&ctx, &store).unwrap();
        assert_eq!(service.state(&ctx), DocumentState::InProgress);
        assert_eq!(service.read(&ctx).unwrap().len(), 1);

        service.set_state(&ctx, DocumentState::Finished);
        assert!(service.is_closed(&ctx));
        assert!(matches!(
            service.write(&ctx, &store),
            Err(CurationError::DocumentClosed(_))
        ));
    }

    #[test]
    fn test_curation_context() {
        let ctx = DocumentContext::curation("doc");
        assert!(ctx.is_curation());
        assert_eq!(ctx.to_string(), "doc/CURATION_USER");
        assert!(!DocumentContext::new("doc", "bob").is_curation());
    }
}
