//! Field values, the per-form value store and the validation engine

mod store;
mod validation;
mod value;

pub use store::{check_value, FieldValueStore, Slot};
pub use validation::{validate, RuleKind, ValidationReport, Violation};
pub use value::{Extensions, FieldId, FieldMap, FieldValue, GroupRow, ValueKind};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Schema violation on '{field_id}': {reason}")]
    SchemaViolation { field_id: String, reason: String },
}

impl FieldError {
    pub(crate) fn violation(field_id: &str, reason: impl Into<String>) -> Self {
        FieldError::SchemaViolation {
            field_id: field_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn field_id(&self) -> &str {
        match self {
            FieldError::SchemaViolation { field_id, .. } => field_id,
        }
    }
}
