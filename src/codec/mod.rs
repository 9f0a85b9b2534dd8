//! Codec suite
//!
//! Three representations of a version:
//!
//! - [`canonical`]: a self-describing JSON document, lossless;
//! - [`des`]: ICS-DES, compact `CODE=VALUE` tokens for voice or
//!   low-bandwidth relay, protected by a byte-sum checksum;
//! - [`delta`]: the ICS-DES grammar carrying only the fields that changed
//!   between two versions of one form.
//!
//! All codecs are pure functions of their inputs and the schema catalog.

pub mod canonical;
pub mod delta;
pub mod des;
mod token;

pub use delta::{Delta, FieldChange};
pub use des::{DesForm, DesOptions};
pub use token::DesLayout;

use thiserror::Error;

use crate::schema::SchemaError;
use crate::version::VersionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Unknown form type: {0}")]
    UnknownFormType(String),

    #[error("Schema mismatch on '{field_id}': {reason}")]
    SchemaMismatch { field_id: String, reason: String },

    #[error("Checksum mismatch: payload carries {expected:02X}, content sums to {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Payload has no readable checksum token")]
    MissingChecksum,

    #[error("Unknown field code: {0}")]
    UnknownFieldCode(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid value for {code}: {reason}")]
    InvalidValue { code: String, reason: String },

    #[error("Version {target} does not descend from version {base}")]
    UnrelatedVersions { base: VersionId, target: VersionId },

    #[error("Base version unavailable: {0}")]
    BaseVersionUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CodecError {
    /// The payload was damaged in transit; ask the sender to repeat it.
    pub fn is_retransmittable(&self) -> bool {
        matches!(
            self,
            CodecError::ChecksumMismatch { .. }
                | CodecError::MissingChecksum
                | CodecError::UnknownFieldCode(_)
        )
    }

    /// A delta cannot be used here; send the full form instead.
    pub fn is_fallback_to_full(&self) -> bool {
        matches!(
            self,
            CodecError::UnrelatedVersions { .. } | CodecError::BaseVersionUnavailable(_)
        )
    }
}

impl From<SchemaError> for CodecError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownFormType(form_type) => CodecError::UnknownFormType(form_type),
            other => CodecError::UnknownFormType(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

/// Parse the `form_id_short` header field.
fn parse_short_id(raw: &str) -> Result<String, CodecError> {
    if !(4..=12).contains(&raw.len()) || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodecError::Malformed(format!("bad short form id '{}'", raw)));
    }
    Ok(raw.to_ascii_lowercase())
}

fn parse_version_id(raw: &str) -> Result<VersionId, CodecError> {
    raw.parse::<VersionId>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or_else(|| CodecError::Malformed(format!("bad version id '{}'", raw)))
}
