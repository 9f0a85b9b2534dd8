//! Differential codec
//!
//! Carries only the fields whose value differs between a base version and
//! a later version of the same form, in ICS-DES grammar:
//!
//! ```text
//! 213:2:3f9a1c0e:1
//! SU=Resupply Urgent
//! ~AP
//! CKSUM=5E
//! ```
//!
//! The header adds the base version id; `~CODE` marks a field that went
//! back to unset. A group that changed in any way is sent whole.

use std::sync::Arc;

use serde::Serialize;

use super::token::{self, FieldDecoder, REMOVAL_SENTINEL};
use super::{parse_short_id, parse_version_id, CodecError, DesOptions};
use crate::fields::{FieldId, FieldMap, FieldValue};
use crate::schema::SchemaCatalog;
use crate::version::{descends_from, short_id, Lineage, Version, VersionId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldChange {
    Set { field_id: FieldId, value: FieldValue },
    Removed { field_id: FieldId },
}

impl FieldChange {
    pub fn field_id(&self) -> &str {
        match self {
            FieldChange::Set { field_id, .. } | FieldChange::Removed { field_id } => field_id,
        }
    }
}

/// A decoded delta payload
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Delta {
    pub form_type: String,
    /// Version the delta produces
    pub version_id: VersionId,
    /// Version the delta must be applied to
    pub base_version_id: VersionId,
    pub short_id: String,
    /// Changes in schema order
    pub changes: Vec<FieldChange>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Encode the changes from `base` to `target`.
///
/// `lineage` resolves parent links so the ancestry of `target` can be
/// checked.
pub fn encode<L: Lineage + ?Sized>(
    base: &Version,
    target: &Version,
    lineage: &L,
    catalog: &SchemaCatalog,
    options: &DesOptions,
) -> Result<String, CodecError> {
    let unrelated = || CodecError::UnrelatedVersions {
        base: base.version_id(),
        target: target.version_id(),
    };
    if base.form_id() != target.form_id() || base.form_type() != target.form_type() {
        return Err(unrelated());
    }
    if !descends_from(lineage, target, base.version_id()) {
        return Err(unrelated());
    }
    let schema = catalog.lookup(target.form_type())?;

    let mut tokens = vec![format!(
        "{}:{}:{}:{}",
        schema.type_code(),
        target.version_id(),
        short_id(target.form_id(), options.short_id_len()),
        base.version_id()
    )];
    for descriptor in schema.top_level() {
        let before = base.field(&descriptor.field_id);
        let after = target.field(&descriptor.field_id);
        match after {
            _ if before == after => {}
            Some(value) => token::push_field(schema, descriptor, value, &mut tokens),
            None => tokens.push(format!("{}{}", REMOVAL_SENTINEL, descriptor.short_code)),
        }
    }

    log::debug!(
        "Encoded delta {} v{} -> v{} ({} tokens)",
        target.form_id(),
        base.version_id(),
        target.version_id(),
        tokens.len() - 1
    );
    Ok(token::frame(tokens, options.layout))
}

pub fn decode(text: &str, catalog: &SchemaCatalog) -> Result<Delta, CodecError> {
    let tokens = token::unframe(text)?;
    let (header, body) = tokens
        .split_first()
        .ok_or_else(|| CodecError::Malformed("payload has no header".into()))?;

    let parts: Vec<&str> = header.split(':').collect();
    let [code, version, short, base] = parts.as_slice() else {
        return Err(CodecError::Malformed(format!("bad delta header '{}'", header)));
    };
    let schema = catalog.by_type_code(code)?;
    let version_id = parse_version_id(version)?;
    let base_version_id = parse_version_id(base)?;
    let short_id = parse_short_id(short)?;
    if base_version_id > version_id {
        return Err(CodecError::Malformed(format!(
            "delta from v{} to older v{}",
            base_version_id, version_id
        )));
    }

    let mut decoder = FieldDecoder::new(schema, true);
    for token in body {
        decoder.push(token)?;
    }
    let (mut fields, removed) = decoder.finish();

    let mut changes = Vec::with_capacity(fields.len() + removed.len());
    for descriptor in schema.top_level() {
        let field_id = &descriptor.field_id;
        if let Some(value) = fields.remove(field_id) {
            changes.push(FieldChange::Set {
                field_id: field_id.clone(),
                value,
            });
        } else if removed.contains(field_id) {
            changes.push(FieldChange::Removed {
                field_id: field_id.clone(),
            });
        }
    }

    Ok(Delta {
        form_type: schema.form_type().to_string(),
        version_id,
        base_version_id,
        short_id,
        changes,
    })
}

/// Reconstruct the target mapping from a held copy of the base version.
///
/// A received copy is matched by the id its sender gave it, a local one by
/// its own id. Either every change applies or nothing does.
pub fn apply(delta: &Delta, base: &Version) -> Result<FieldMap, CodecError> {
    let held_as = base.origin_version_id().unwrap_or(base.version_id());
    let same_form = base.form_type() == delta.form_type
        && short_id(base.form_id(), delta.short_id.len()) == delta.short_id;
    if !same_form || held_as != delta.base_version_id {
        return Err(CodecError::BaseVersionUnavailable(format!(
            "delta needs {} v{} of {}, held copy is v{} of {}",
            delta.form_type,
            delta.base_version_id,
            delta.short_id,
            held_as,
            base.form_id()
        )));
    }

    let mut fields = base.fields().clone();
    for change in &delta.changes {
        match change {
            FieldChange::Set { field_id, value } => {
                fields.insert(field_id.clone(), value.clone());
            }
            FieldChange::Removed { field_id } => {
                fields.remove(field_id);
            }
        }
    }
    Ok(fields)
}

/// Look the base version up in `lineage`, then [`apply`].
pub fn apply_from<L: Lineage + ?Sized>(
    lineage: &L,
    delta: &Delta,
) -> Result<(Arc<Version>, FieldMap), CodecError> {
    let base = lineage.version(delta.base_version_id).ok_or_else(|| {
        CodecError::BaseVersionUnavailable(format!(
            "no v{} of {} held",
            delta.base_version_id, delta.short_id
        ))
    })?;
    let fields = apply(delta, &base)?;
    Ok((base, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Extensions, GroupRow};
    use crate::schema::ics;
    use crate::version::{VersionChain, VersionDraft};
    use chrono::Utc;
    use uuid::Uuid;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::standard().unwrap()
    }

    fn commit(chain: &mut VersionChain, fields: &FieldMap) -> Arc<Version> {
        let head = chain.head_id();
        chain
            .append(
                head,
                VersionDraft {
                    created_at: Utc::now(),
                    created_by: "ops".into(),
                    incomplete: false,
                    fields: fields.clone(),
                    extensions: Extensions::new(),
                    origin_version_id: None,
                    attributes: Extensions::new(),
                },
            )
            .unwrap()
    }

    fn message_chain() -> (VersionChain, Arc<Version>, Arc<Version>) {
        let mut chain = VersionChain::new(Uuid::new_v4(), ics::ICS_213);
        let mut fields = FieldMap::new();
        fields.insert("to".into(), FieldValue::text("Ops"));
        fields.insert("from".into(), FieldValue::text("Planning"));
        fields.insert("subject".into(), FieldValue::text("Resupply"));
        let v1 = commit(&mut chain, &fields);
        fields.insert("subject".into(), FieldValue::text("Resupply Urgent"));
        let v2 = commit(&mut chain, &fields);
        (chain, v1, v2)
    }

    #[test]
    fn test_delta_carries_only_changes() {
        let catalog = catalog();
        let (chain, v1, v2) = message_chain();
        let text = encode(&v1, &v2, &chain, &catalog, &DesOptions::default()).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("213:2:{}:1", short_id(v2.form_id(), 8)));
        assert_eq!(lines[1], "SU=Resupply Urgent");
        assert_eq!(lines.len(), 3);

        let delta = decode(&text, &catalog).unwrap();
        assert_eq!(delta.changes.len(), 1);
        assert_eq!(delta.changes[0].field_id(), "subject");
        assert_eq!(&apply(&delta, &v1).unwrap(), v2.fields());
    }

    #[test]
    fn test_removal_sentinel() {
        let catalog = catalog();
        let (mut chain, _, v2) = message_chain();
        let mut fields = v2.fields().clone();
        fields.remove("subject");
        fields.insert("message".into(), FieldValue::text("Stand by"));
        let v3 = commit(&mut chain, &fields);

        let text = encode(&v2, &v3, &chain, &catalog, &DesOptions::piped()).unwrap();
        assert!(text.contains("|~SU|"));
        assert!(text.contains("|MS=Stand by|"));

        let delta = decode(&text, &catalog).unwrap();
        assert_eq!(delta.base_version_id, 2);
        assert_eq!(delta.version_id, 3);
        let (base, applied) = apply_from(&chain, &delta).unwrap();
        assert_eq!(base.version_id(), 2);
        assert_eq!(&applied, v3.fields());
    }

    #[test]
    fn test_changed_group_sent_whole() {
        let catalog = catalog();
        let mut chain = VersionChain::new(Uuid::new_v4(), ics::ICS_214);
        let mut row = GroupRow::new();
        row.insert("resource_name".into(), FieldValue::text("Engine 4"));
        let mut fields = FieldMap::new();
        fields.insert("name".into(), FieldValue::text("J. Ortiz"));
        fields.insert("resources".into(), FieldValue::Group(vec![row.clone()]));
        let v1 = commit(&mut chain, &fields);

        let mut second = GroupRow::new();
        second.insert("resource_name".into(), FieldValue::text("Dozer 2"));
        fields.insert("resources".into(), FieldValue::Group(vec![row, second]));
        let v2 = commit(&mut chain, &fields);

        let text = encode(&v1, &v2, &chain, &catalog, &DesOptions::default()).unwrap();
        assert!(text.contains("RS=2\nRN#1=Engine 4\nRN#2=Dozer 2\n"));
        assert!(!text.contains("NM="));

        let delta = decode(&text, &catalog).unwrap();
        assert_eq!(&apply(&delta, &v1).unwrap(), v2.fields());
    }

    #[test]
    fn test_identical_versions_give_empty_delta() {
        let catalog = catalog();
        let (chain, _, v2) = message_chain();
        let text = encode(&v2, &v2, &chain, &catalog, &DesOptions::default()).unwrap();
        assert_eq!(text.lines().count(), 2);
        let delta = decode(&text, &catalog).unwrap();
        assert!(delta.is_empty());
        assert_eq!(&apply(&delta, &v2).unwrap(), v2.fields());
    }

    #[test]
    fn test_unrelated_versions() {
        let catalog = catalog();
        let (chain, v1, v2) = message_chain();
        let err = encode(&v2, &v1, &chain, &catalog, &DesOptions::default()).unwrap_err();
        assert_eq!(err, CodecError::UnrelatedVersions { base: 2, target: 1 });

        let (other_chain, other_v1, _) = message_chain();
        let err = encode(&other_v1, &v2, &other_chain, &catalog, &DesOptions::default()).unwrap_err();
        assert!(err.is_fallback_to_full());
    }

    #[test]
    fn test_wrong_base_never_merges() {
        let catalog = catalog();
        let (mut chain, v1, v2) = message_chain();
        let v3 = commit(&mut chain, &{
            let mut fields = v2.fields().clone();
            fields.insert("reply".into(), FieldValue::text("Copy"));
            fields
        });
        let text = encode(&v2, &v3, &chain, &catalog, &DesOptions::default()).unwrap();
        let delta = decode(&text, &catalog).unwrap();

        let err = apply(&delta, &v1).unwrap_err();
        assert!(matches!(err, CodecError::BaseVersionUnavailable(_)));

        let (other_chain, _, _) = message_chain();
        let err = apply_from(&other_chain, &delta).unwrap_err();
        assert!(matches!(err, CodecError::BaseVersionUnavailable(_)));

        let empty = VersionChain::new(v1.form_id(), ics::ICS_213);
        let err = apply_from(&empty, &delta).unwrap_err();
        assert!(err.is_fallback_to_full());
    }

    #[test]
    fn test_received_copy_matched_by_sender_id() {
        let catalog = catalog();
        let (mut chain, _, v2) = message_chain();
        let mut fields = v2.fields().clone();
        fields.insert("approved_by".into(), FieldValue::text("IC"));
        let v3 = commit(&mut chain, &fields);
        let text = encode(&v2, &v3, &chain, &catalog, &DesOptions::default()).unwrap();
        let delta = decode(&text, &catalog).unwrap();

        // The receiver missed sender v1 and holds sender v2 as its own v1.
        let mut received = VersionChain::new(v2.form_id(), ics::ICS_213);
        let local = received
            .append(
                None,
                VersionDraft {
                    created_at: Utc::now(),
                    created_by: "radio".into(),
                    incomplete: false,
                    fields: v2.fields().clone(),
                    extensions: Extensions::new(),
                    origin_version_id: Some(2),
                    attributes: Extensions::new(),
                },
            )
            .unwrap();
        assert_eq!(local.version_id(), 1);
        assert_eq!(&apply(&delta, &local).unwrap(), v3.fields());

        // A local v2 whose sender id is 3 is not the base the delta names.
        let stale = received
            .append(
                Some(1),
                VersionDraft {
                    created_at: Utc::now(),
                    created_by: "radio".into(),
                    incomplete: false,
                    fields: v3.fields().clone(),
                    extensions: Extensions::new(),
                    origin_version_id: Some(3),
                    attributes: Extensions::new(),
                },
            )
            .unwrap();
        assert_eq!(stale.version_id(), 2);
        assert!(matches!(
            apply(&delta, &stale),
            Err(CodecError::BaseVersionUnavailable(_))
        ));
    }

    #[test]
    fn test_delta_header_checks() {
        let catalog = catalog();
        let frame = |tokens: &[&str]| {
            token::frame(
                tokens.iter().map(|t| t.to_string()).collect(),
                crate::codec::DesLayout::Lines,
            )
        };
        assert!(matches!(
            decode(&frame(&["213:1:abcd1234:2"]), &catalog),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(&frame(&["213:2:abcd1234"]), &catalog),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(&frame(&["213:2:abcd1234:1", "~SU", "SU=x"]), &catalog),
            Err(CodecError::Malformed(_))
        ));
    }
}
