use std::{io, num::ParseIntError};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::event::AnnotationEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CurationError {
    /// A structural placement rule was violated. The store is left untouched.
    #[error("Illegal placement: {0}")]
    IllegalPlacement(String),
    #[error("Malformed VID: {0}")]
    MalformedVid(String),
    #[error("Annotation already merged: {0}")]
    AlreadyMerged(String),
    #[error("Merge conflict: {0}")]
    MergeConflict(String),
    #[error("Document is closed for editing: {0}")]
    DocumentClosed(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Invalid feature value: {0}")]
    InvalidFeature(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Event publication error: {0}")]
    Event(String),
}

impl CurationError {
    /// `AlreadyMerged` and `MergeConflict` are anticipated results of a merge attempt rather than
    /// defects; batch merges count them separately from other failures.
    pub fn is_expected_merge_outcome(&self) -> bool {
        matches!(
            self,
            CurationError::AlreadyMerged(_) | CurationError::MergeConflict(_)
        )
    }
}

impl From<toml::de::Error> for CurationError {
    fn from(src: toml::de::Error) -> CurationError {
        CurationError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for CurationError {
    fn from(src: toml::ser::Error) -> CurationError {
        CurationError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for CurationError {
    fn from(src: JsonError) -> CurationError {
        CurationError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<ParseIntError> for CurationError {
    fn from(src: ParseIntError) -> CurationError {
        CurationError::MalformedVid(format!("integer component out of range: {src}"))
    }
}

impl From<io::Error> for CurationError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => CurationError::NotFound(format!("{x}")),
            _ => CurationError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<TokioSendError<AnnotationEvent>> for CurationError {
    fn from(x: TokioSendError<AnnotationEvent>) -> Self {
        CurationError::Event(format!(
            "Channel send Error, could not transmit annotation event {}",
            x.0
        ))
    }
}
