//! The version store
//!
//! Holds every known form instance and its chain. Commits are
//! compare-and-swap on the chain head: a session remembers the head it was
//! based on, and the commit is refused if another commit got there first.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use uuid::Uuid;

use super::chain::{History, Lineage, VersionChain};
use super::snapshot::{content_fingerprint, Version, VersionDraft, VersionId, VersionStatus};
use super::VersionError;
use crate::fields::{Extensions, FieldMap, FieldValueStore};
use crate::schema::SchemaCatalog;
use crate::session::EditSession;

/// How a commit treats validation violations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// Refuse to commit while any rule is violated
    Strict,
    /// Commit anyway, flagging the version incomplete
    Draft,
}

/// Field values that arrived from outside (a decoded payload)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Incoming {
    pub form_id: Uuid,
    pub form_type: String,
    pub fields: FieldMap,
    pub extensions: Extensions,
    /// The sender's id for this version, when the payload names one
    pub origin_version_id: Option<VersionId>,
    /// Unknown top-level keys of a canonical document
    pub attributes: Extensions,
}

impl Incoming {
    pub fn from_version(version: &Version) -> Self {
        Self {
            form_id: version.form_id(),
            form_type: version.form_type().to_string(),
            fields: version.fields().clone(),
            extensions: version.extensions().clone(),
            origin_version_id: None,
            attributes: version.attributes().clone(),
        }
    }

    /// Record the sender's id for the version being received.
    pub fn sent_as(mut self, origin_version_id: VersionId) -> Self {
        self.origin_version_id = Some(origin_version_id);
        self
    }
}

/// A form and its exclusively owned version chain
#[derive(Debug)]
pub struct FormInstance {
    form_id: Uuid,
    form_type: String,
    chain: Arc<RwLock<VersionChain>>,
}

impl FormInstance {
    fn new(chain: VersionChain) -> Self {
        Self {
            form_id: chain.form_id(),
            form_type: chain.form_type().to_string(),
            chain: Arc::new(RwLock::new(chain)),
        }
    }

    pub fn form_id(&self) -> Uuid {
        self.form_id
    }

    pub fn form_type(&self) -> &str {
        &self.form_type
    }

    pub fn latest(&self) -> Option<Arc<Version>> {
        self.read().head().cloned()
    }

    pub fn at(&self, version_id: VersionId) -> Option<Arc<Version>> {
        self.read().at(version_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn history(&self) -> History {
        History::new(self.chain.clone())
    }

    pub fn status(&self, version_id: VersionId) -> Result<VersionStatus, VersionError> {
        self.read().status(version_id)
    }

    pub fn archive(&self, version_id: VersionId) -> Result<(), VersionError> {
        self.write().archive(version_id)
    }

    /// Ids of the archived versions, ascending
    pub fn archived(&self) -> Vec<VersionId> {
        self.read().archived().collect()
    }

    /// The latest version received under the sender's id `origin`
    pub fn by_origin(&self, origin: VersionId) -> Option<Arc<Version>> {
        self.read().by_origin(origin).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, VersionChain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VersionChain> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Lineage for FormInstance {
    fn version(&self, version_id: VersionId) -> Option<Arc<Version>> {
        self.at(version_id)
    }
}

pub struct VersionStore {
    catalog: Arc<SchemaCatalog>,
    forms: RwLock<HashMap<Uuid, Arc<FormInstance>>>,
}

impl VersionStore {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            forms: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Open a session for a brand-new form of `form_type`.
    pub fn new_form(&self, form_type: &str) -> Result<EditSession, VersionError> {
        let schema = self.catalog.lookup(form_type)?.clone();
        Ok(EditSession::fresh(Uuid::new_v4(), schema))
    }

    /// Open a session seeded from the current head of a form.
    pub fn begin_edit(&self, form_id: Uuid) -> Result<EditSession, VersionError> {
        let instance = self.form(form_id)?;
        let head = instance
            .latest()
            .ok_or_else(|| VersionError::UnknownForm(form_id.to_string()))?;
        let schema = self.catalog.lookup(instance.form_type())?.clone();
        Ok(EditSession::from_version(schema, head)?)
    }

    /// Freeze the session's values into the next version of its form.
    ///
    /// On success the session is re-based on the new version and marked
    /// clean; its change history stays available.
    pub fn commit(
        &self,
        session: &mut EditSession,
        mode: CommitMode,
        created_by: &str,
    ) -> Result<Arc<Version>, VersionError> {
        let report = session.validate();
        let incomplete = !report.is_valid();
        if incomplete && mode == CommitMode::Strict {
            log::warn!(
                "Commit of {} blocked: {}",
                session.form_id(),
                report
            );
            return Err(VersionError::ValidationFailed(report));
        }

        let instance = match self.find(session.form_id()) {
            Some(instance) => instance,
            None if session.base().is_none() => {
                self.insert_if_absent(VersionChain::new(session.form_id(), session.form_type()))
            }
            None => return Err(VersionError::UnknownForm(session.form_id().to_string())),
        };
        if instance.form_type() != session.form_type() {
            return Err(VersionError::FormTypeMismatch {
                expected: instance.form_type().to_string(),
                found: session.form_type().to_string(),
            });
        }

        let draft = VersionDraft {
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            incomplete,
            fields: session.store().values().clone(),
            extensions: session.store().extensions().clone(),
            origin_version_id: None,
            attributes: Extensions::new(),
        };
        let version = instance
            .write()
            .append(session.base_version_id(), draft)
            .map_err(|e| {
                log::warn!("Commit of {} rejected: {}", session.form_id(), e);
                e
            })?;

        log::debug!(
            "Committed {} v{} ({} fields{})",
            version.form_id(),
            version.version_id(),
            version.fields().len(),
            if incomplete { ", incomplete" } else { "" }
        );
        session.committed(version.clone());
        Ok(version)
    }

    /// Commit values decoded from a payload as the next version of their form.
    ///
    /// Unknown forms are created. A payload whose content equals the version
    /// already received under the same sender id (or, without a sender id,
    /// the current head) is a retransmission and returns that version. Received
    /// values are never refused for validation reasons; the version is
    /// flagged incomplete instead.
    pub fn receive(&self, incoming: Incoming, created_by: &str) -> Result<Arc<Version>, VersionError> {
        let schema = self.catalog.lookup(&incoming.form_type)?.clone();
        let store = FieldValueStore::from_values(schema, incoming.fields, incoming.extensions)?;
        let incomplete = !store.validate().is_valid();
        let (fields, extensions) = store.into_parts();

        let instance = match self.find(incoming.form_id) {
            Some(instance) => instance,
            None => self.insert_if_absent(VersionChain::new(incoming.form_id, &incoming.form_type)),
        };
        if instance.form_type() != incoming.form_type {
            return Err(VersionError::FormTypeMismatch {
                expected: instance.form_type().to_string(),
                found: incoming.form_type,
            });
        }

        let mut chain = instance.write();
        let fingerprint = content_fingerprint(&incoming.form_type, &fields, &extensions);
        let held = match incoming.origin_version_id {
            Some(origin) => chain.by_origin(origin),
            None => chain.head(),
        };
        if let Some(held) = held.filter(|v| v.fingerprint() == fingerprint) {
            log::info!(
                "Received copy of {} v{} already held; not committing again",
                held.form_id(),
                held.version_id()
            );
            return Ok(held.clone());
        }

        let head = chain.head_id();
        let version = chain.append(
            head,
            VersionDraft {
                created_at: Utc::now(),
                created_by: created_by.to_string(),
                incomplete,
                fields,
                extensions,
                origin_version_id: incoming.origin_version_id,
                attributes: incoming.attributes,
            },
        )?;
        log::debug!(
            "Received {} v{}{}",
            version.form_id(),
            version.version_id(),
            if incomplete { " (incomplete)" } else { "" }
        );
        Ok(version)
    }

    /// Rebuild a form from previously persisted versions.
    pub fn restore(&self, mut versions: Vec<Version>) -> Result<Arc<FormInstance>, VersionError> {
        let first = versions
            .first()
            .ok_or_else(|| VersionError::BrokenChain("no versions to restore".into()))?;
        let form_id = first.form_id();
        let form_type = first.form_type().to_string();
        let schema = self.catalog.lookup(&form_type)?.clone();

        if self.find(form_id).is_some() {
            return Err(VersionError::AlreadyExists(form_id.to_string()));
        }

        versions.sort_by_key(|v| v.version_id());
        let mut chain = VersionChain::new(form_id, &form_type);
        for version in versions {
            FieldValueStore::from_values(
                schema.clone(),
                version.fields().clone(),
                version.extensions().clone(),
            )?;
            chain.push_existing(version)?;
        }

        let mut forms = self.forms_mut();
        if forms.contains_key(&form_id) {
            return Err(VersionError::AlreadyExists(form_id.to_string()));
        }
        log::info!("Restored {} with {} versions", form_id, chain.len());
        let instance = Arc::new(FormInstance::new(chain));
        forms.insert(form_id, instance.clone());
        Ok(instance)
    }

    pub fn form(&self, form_id: Uuid) -> Result<Arc<FormInstance>, VersionError> {
        self.find(form_id)
            .ok_or_else(|| VersionError::UnknownForm(form_id.to_string()))
    }

    pub fn form_ids(&self) -> Vec<Uuid> {
        self.forms_ref().keys().copied().collect()
    }

    pub fn latest(&self, form_id: Uuid) -> Result<Arc<Version>, VersionError> {
        self.form(form_id)?
            .latest()
            .ok_or_else(|| VersionError::UnknownForm(form_id.to_string()))
    }

    pub fn at(&self, form_id: Uuid, version_id: VersionId) -> Result<Arc<Version>, VersionError> {
        self.form(form_id)?
            .at(version_id)
            .ok_or(VersionError::UnknownVersion { form_id, version_id })
    }

    pub fn history(&self, form_id: Uuid) -> Result<History, VersionError> {
        Ok(self.form(form_id)?.history())
    }

    pub fn status(&self, form_id: Uuid, version_id: VersionId) -> Result<VersionStatus, VersionError> {
        self.form(form_id)?.status(version_id)
    }

    pub fn archive(&self, form_id: Uuid, version_id: VersionId) -> Result<(), VersionError> {
        self.form(form_id)?.archive(version_id)?;
        log::info!("Archived {} v{}", form_id, version_id);
        Ok(())
    }

    /// Resolve the short form id carried by ICS-DES headers.
    pub fn find_by_short_id(&self, short: &str) -> Result<Uuid, VersionError> {
        let forms = self.forms_ref();
        let mut matches = forms
            .keys()
            .filter(|id| short_id(**id, short.len()).eq_ignore_ascii_case(short));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(*id),
            (Some(_), Some(_)) => Err(VersionError::AmbiguousShortId(short.to_string())),
            (None, _) => Err(VersionError::UnknownForm(short.to_string())),
        }
    }

    fn find(&self, form_id: Uuid) -> Option<Arc<FormInstance>> {
        self.forms_ref().get(&form_id).cloned()
    }

    fn insert_if_absent(&self, chain: VersionChain) -> Arc<FormInstance> {
        self.forms_mut()
            .entry(chain.form_id())
            .or_insert_with(|| Arc::new(FormInstance::new(chain)))
            .clone()
    }

    fn forms_ref(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<FormInstance>>> {
        self.forms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn forms_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<FormInstance>>> {
        self.forms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leading hex digits of a form id, as used in ICS-DES headers
pub fn short_id(form_id: Uuid, len: usize) -> String {
    let mut hex = hex::encode(form_id.as_bytes());
    hex.truncate(len);
    hex
}

/// A fresh random form id whose hex form starts with `prefix`.
///
/// Limited to 12 digits so the UUID version nibble is left intact.
pub(crate) fn form_id_with_prefix(prefix: &str) -> Option<Uuid> {
    if prefix.is_empty() || prefix.len() > 12 {
        return None;
    }
    let mut bytes = *Uuid::new_v4().as_bytes();
    for (i, c) in prefix.chars().enumerate() {
        let nibble = c.to_digit(16)? as u8;
        let byte = &mut bytes[i / 2];
        *byte = if i % 2 == 0 {
            (*byte & 0x0f) | (nibble << 4)
        } else {
            (*byte & 0xf0) | nibble
        };
    }
    Some(Uuid::from_bytes(bytes))
}
