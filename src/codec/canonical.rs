//! Canonical JSON document codec
//!
//! ```json
//! {
//!   "form_id": "…", "form_type": "ICS-213", "version_id": 2,
//!   "parent_version_id": 1, "created_at": "…", "created_by": "…",
//!   "incomplete": false,
//!   "fields": { "subject": { "type": "text", "value": "Resupply" } }
//! }
//! ```
//!
//! Entries of `fields` that the schema does not declare are kept opaque in
//! the version's extensions and written back unchanged; top-level keys
//! outside this layout are kept in the version's attributes the same way.
//! Received versions also carry `origin_version_id`, the sender's id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CodecError;
use crate::fields::{check_value, Extensions, FieldMap, FieldValue};
use crate::schema::SchemaCatalog;
use crate::version::{Version, VersionId};

#[derive(Debug, Serialize, Deserialize)]
struct CanonicalDocument {
    form_id: Uuid,
    form_type: String,
    version_id: VersionId,
    parent_version_id: Option<VersionId>,
    created_at: DateTime<Utc>,
    created_by: String,
    #[serde(default)]
    incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_version_id: Option<VersionId>,
    fields: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    attributes: Extensions,
}

fn document(version: &Version) -> Result<CanonicalDocument, CodecError> {
    let mut fields = BTreeMap::new();
    for (field_id, raw) in version.extensions() {
        fields.insert(field_id.clone(), raw.clone());
    }
    for (field_id, value) in version.fields() {
        fields.insert(field_id.clone(), serde_json::to_value(value)?);
    }
    Ok(CanonicalDocument {
        form_id: version.form_id(),
        form_type: version.form_type().to_string(),
        version_id: version.version_id(),
        parent_version_id: version.parent_version_id(),
        created_at: version.created_at(),
        created_by: version.created_by().to_string(),
        incomplete: version.is_incomplete(),
        origin_version_id: version.origin_version_id(),
        fields,
        attributes: version.attributes().clone(),
    })
}

/// Compact canonical bytes, as handed to persistence
pub fn encode(version: &Version) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&document(version)?)?)
}

/// Indented canonical text, for people
pub fn encode_pretty(version: &Version) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(&document(version)?)?)
}

pub fn decode(bytes: &[u8], catalog: &SchemaCatalog) -> Result<Version, CodecError> {
    let doc: CanonicalDocument = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::Malformed(format!("canonical document: {}", e)))?;
    let schema = catalog.lookup(&doc.form_type)?;

    let expected_parent = doc.version_id.checked_sub(1).filter(|id| *id >= 1);
    if doc.version_id == 0 || doc.parent_version_id != expected_parent {
        return Err(CodecError::Malformed(format!(
            "version {} cannot have parent {:?}",
            doc.version_id, doc.parent_version_id
        )));
    }

    let mut fields = FieldMap::new();
    let mut extensions = Extensions::new();
    for (field_id, raw) in doc.fields {
        if schema.descriptor(&field_id).is_none() {
            extensions.insert(field_id, raw);
            continue;
        }
        let value: FieldValue = serde_json::from_value(raw).map_err(|e| CodecError::SchemaMismatch {
            field_id: field_id.clone(),
            reason: e.to_string(),
        })?;
        check_value(schema, &field_id, &value).map_err(|e| CodecError::SchemaMismatch {
            field_id: field_id.clone(),
            reason: e.to_string(),
        })?;
        fields.insert(field_id, value);
    }

    Ok(Version::new(
        doc.form_id,
        doc.form_type,
        doc.version_id,
        doc.parent_version_id,
        doc.created_at,
        doc.created_by,
        doc.incomplete,
        fields,
        extensions,
    )
    .with_origin(doc.origin_version_id)
    .with_attributes(doc.attributes))
}
