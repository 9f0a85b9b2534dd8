//! Immutable, append-only version history of forms
//!
//! Each commit of an editing session freezes the session's values into a new
//! [`Version`] linked to the previous head. Versions are never mutated or
//! deleted; "superseded" and "archived" are statuses, not transitions.

mod chain;
mod snapshot;
mod store;

pub use chain::{descends_from, History, HistoryIter, Lineage, VersionChain};
pub use snapshot::{Version, VersionId, VersionStatus};
pub use store::{short_id, CommitMode, FormInstance, Incoming, VersionStore};

#[cfg(test)]
pub(crate) use snapshot::VersionDraft;
pub(crate) use store::form_id_with_prefix;

use thiserror::Error;
use uuid::Uuid;

use crate::fields::{FieldError, ValidationReport};
use crate::schema::SchemaError;
use crate::session::TrackerError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VersionError {
    #[error("Unknown form type: {0}")]
    UnknownFormType(String),

    #[error("Unknown form: {0}")]
    UnknownForm(String),

    #[error("Form {form_id} has no version {version_id}")]
    UnknownVersion { form_id: Uuid, version_id: VersionId },

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationReport),

    #[error("Concurrent modification of {form_id}: expected head {expected:?}, found {actual:?}")]
    ConcurrentModification {
        form_id: Uuid,
        expected: Option<VersionId>,
        actual: Option<VersionId>,
    },

    #[error("Form type mismatch: expected {expected}, found {found}")]
    FormTypeMismatch { expected: String, found: String },

    #[error("Broken chain: {0}")]
    BrokenChain(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Ambiguous short form id: {0}")]
    AmbiguousShortId(String),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl From<SchemaError> for VersionError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownFormType(form_type) => VersionError::UnknownFormType(form_type),
            other => VersionError::UnknownFormType(other.to_string()),
        }
    }
}

impl VersionError {
    /// The violation list carried by a blocked commit
    pub fn violations(&self) -> Option<&ValidationReport> {
        match self {
            VersionError::ValidationFailed(report) => Some(report),
            _ => None,
        }
    }
}
