//! Immutable version snapshots

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::fields::{Extensions, FieldMap, FieldValue};

/// Version number within one form, starting at 1
pub type VersionId = u64;

/// Lifecycle status of a version within its chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionStatus {
    /// The chain head
    Current,
    /// An older version; still readable
    Superseded,
    /// Flagged as archived; still readable
    Archived,
}

/// A frozen snapshot of a form's field values.
///
/// Fields are private and only readable; a new snapshot is the only way
/// to change anything.
#[derive(Clone, Debug, PartialEq)]
pub struct Version {
    form_id: Uuid,
    form_type: String,
    version_id: VersionId,
    parent_version_id: Option<VersionId>,
    created_at: DateTime<Utc>,
    created_by: String,
    incomplete: bool,
    fields: FieldMap,
    extensions: Extensions,
    /// Sender's id for this version, when it was received
    origin_version_id: Option<VersionId>,
    /// Canonical document keys outside the known layout, carried verbatim
    attributes: Extensions,
}

/// Fields of a version before its identity in the chain is known
#[derive(Clone, Debug)]
pub(crate) struct VersionDraft {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub incomplete: bool,
    pub fields: FieldMap,
    pub extensions: Extensions,
    pub origin_version_id: Option<VersionId>,
    pub attributes: Extensions,
}

impl Version {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        form_id: Uuid,
        form_type: String,
        version_id: VersionId,
        parent_version_id: Option<VersionId>,
        created_at: DateTime<Utc>,
        created_by: String,
        incomplete: bool,
        fields: FieldMap,
        extensions: Extensions,
    ) -> Self {
        Self {
            form_id,
            form_type,
            version_id,
            parent_version_id,
            created_at,
            created_by,
            incomplete,
            fields,
            extensions,
            origin_version_id: None,
            attributes: Extensions::new(),
        }
    }

    pub(crate) fn with_origin(mut self, origin_version_id: Option<VersionId>) -> Self {
        self.origin_version_id = origin_version_id;
        self
    }

    pub(crate) fn with_attributes(mut self, attributes: Extensions) -> Self {
        self.attributes = attributes;
        self
    }

    pub(crate) fn from_draft(
        form_id: Uuid,
        form_type: String,
        version_id: VersionId,
        parent_version_id: Option<VersionId>,
        draft: VersionDraft,
    ) -> Self {
        Self::new(
            form_id,
            form_type,
            version_id,
            parent_version_id,
            draft.created_at,
            draft.created_by,
            draft.incomplete,
            draft.fields,
            draft.extensions,
        )
        .with_origin(draft.origin_version_id)
        .with_attributes(draft.attributes)
    }

    pub fn form_id(&self) -> Uuid {
        self.form_id
    }

    pub fn form_type(&self) -> &str {
        &self.form_type
    }

    pub fn version_id(&self) -> VersionId {
        self.version_id
    }

    pub fn parent_version_id(&self) -> Option<VersionId> {
        self.parent_version_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Force-committed with validation violations
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldValue> {
        self.fields.get(field_id)
    }

    /// Fields unknown to the schema, carried verbatim
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The id the sending station gave this version, for received versions.
    ///
    /// Deltas name their base by the sender's id, which drifts from the
    /// local id as soon as a transmission is missed.
    pub fn origin_version_id(&self) -> Option<VersionId> {
        self.origin_version_id
    }

    /// Unknown top-level keys of the canonical document this version was
    /// decoded from
    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    /// Hex SHA-256 over the form type and content, ignoring attribution
    /// and timestamps. Equal fingerprints mean equal content.
    pub fn fingerprint(&self) -> String {
        content_fingerprint(&self.form_type, &self.fields, &self.extensions)
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    form_type: &'a str,
    fields: &'a FieldMap,
    extensions: &'a Extensions,
}

pub(crate) fn content_fingerprint(form_type: &str, fields: &FieldMap, extensions: &Extensions) -> String {
    let input = FingerprintInput {
        form_type,
        fields,
        extensions,
    };
    // Maps of finite values always serialize.
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(fields: FieldMap, created_by: &str) -> Version {
        Version::new(
            Uuid::new_v4(),
            "ICS-213".into(),
            1,
            None,
            Utc::now(),
            created_by.into(),
            false,
            fields,
            Extensions::new(),
        )
    }

    #[test]
    fn test_fingerprint_ignores_attribution() {
        let mut fields = FieldMap::new();
        fields.insert("to".into(), FieldValue::text("Ops"));

        let a = version(fields.clone(), "alice");
        let b = version(fields.clone(), "bob");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        fields.insert("from".into(), FieldValue::text("Planning"));
        let c = version(fields, "alice");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
