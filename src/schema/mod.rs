//! Form schemas and the schema catalog
//!
//! A schema describes one form type: the ordered field descriptors that make
//! up the form (with their short codes for compact transmission), which of
//! them are required, which belong to repeatable groups, and the cross-field
//! rules evaluated after per-field validation.
//!
//! The catalog is built once, then shared read-only (`Arc<SchemaCatalog>`)
//! with the version store and passed by reference to the codecs.

mod catalog;
mod descriptor;
pub mod ics;

pub use catalog::{CatalogBuilder, SchemaCatalog};
pub use descriptor::{CrossFieldRule, FieldDescriptor, FormSchema, Moment, SemanticType};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown form type: {0}")]
    UnknownFormType(String),

    #[error("Duplicate form type: {0}")]
    DuplicateFormType(String),

    #[error("Duplicate form type code: {0}")]
    DuplicateTypeCode(String),

    #[error("Invalid schema for {form_type}: {reason}")]
    InvalidSchema { form_type: String, reason: String },
}

impl SchemaError {
    pub(crate) fn invalid(form_type: &str, reason: impl Into<String>) -> Self {
        SchemaError::InvalidSchema {
            form_type: form_type.to_string(),
            reason: reason.into(),
        }
    }
}
