//! Moving versions between the local store and the radio channel
//!
//! A [`Relay`] wraps a version store and a persistence adapter. Every
//! version it commits or receives is written to persistence as canonical
//! bytes; exports render stored versions with one of the codecs, imports
//! decode a payload and hand the resulting mapping to the store.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::config::EngineConfig;
use crate::persist::{FormPersistence, PersistError};
use crate::schema::SchemaCatalog;
use crate::session::EditSession;
use crate::version::{
    form_id_with_prefix, CommitMode, Incoming, Version, VersionError, VersionId, VersionStore,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl RelayError {
    /// The sender should repeat the transmission.
    pub fn is_retransmittable(&self) -> bool {
        matches!(self, RelayError::Codec(e) if e.is_retransmittable())
    }

    /// The sender should fall back to a full ICS-DES transfer.
    pub fn is_fallback_to_full(&self) -> bool {
        matches!(self, RelayError::Codec(e) if e.is_fallback_to_full())
    }
}

pub struct Relay {
    store: VersionStore,
    persistence: Arc<dyn FormPersistence>,
    config: EngineConfig,
}

impl Relay {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        persistence: Arc<dyn FormPersistence>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store: VersionStore::new(catalog),
            persistence,
            config,
        }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Commit under the configured default author.
    pub fn commit(&self, session: &mut EditSession, mode: CommitMode) -> Result<Arc<Version>, RelayError> {
        let author = self.config.default_author.clone();
        self.commit_as(session, mode, &author)
    }

    pub fn commit_as(
        &self,
        session: &mut EditSession,
        mode: CommitMode,
        created_by: &str,
    ) -> Result<Arc<Version>, RelayError> {
        let version = self.store.commit(session, mode, created_by)?;
        self.persist(&version)?;
        Ok(version)
    }

    fn persist(&self, version: &Version) -> Result<(), RelayError> {
        let bytes = codec::canonical::encode(version)?;
        self.persistence
            .store(version.form_id(), version.version_id(), &bytes)?;
        Ok(())
    }

    fn version(&self, form_id: Uuid, version_id: Option<VersionId>) -> Result<Arc<Version>, RelayError> {
        Ok(match version_id {
            Some(version_id) => self.store.at(form_id, version_id)?,
            None => self.store.latest(form_id)?,
        })
    }

    /// Canonical JSON of a version (the head when `version_id` is `None`)
    pub fn export_canonical(&self, form_id: Uuid, version_id: Option<VersionId>) -> Result<String, RelayError> {
        let version = self.version(form_id, version_id)?;
        Ok(codec::canonical::encode_pretty(&version)?)
    }

    /// ICS-DES text of a version (the head when `version_id` is `None`)
    pub fn export_des(&self, form_id: Uuid, version_id: Option<VersionId>) -> Result<String, RelayError> {
        let version = self.version(form_id, version_id)?;
        Ok(codec::des::encode(
            &version,
            self.store.catalog(),
            &self.config.des_options(),
        )?)
    }

    /// Delta text from `base` to `target` (the head when `None`)
    pub fn export_delta(
        &self,
        form_id: Uuid,
        base: VersionId,
        target: Option<VersionId>,
    ) -> Result<String, RelayError> {
        let instance = self.store.form(form_id)?;
        let base = self.store.at(form_id, base)?;
        let target = self.version(form_id, target)?;
        Ok(codec::delta::encode(
            &base,
            &target,
            &*instance,
            self.store.catalog(),
            &self.config.des_options(),
        )?)
    }

    /// Receive a canonical document as the next version of its form.
    pub fn import_canonical(&self, bytes: &[u8]) -> Result<Arc<Version>, RelayError> {
        let decoded = codec::canonical::decode(bytes, self.store.catalog())?;
        let version = self
            .store
            .receive(
                Incoming::from_version(&decoded).sent_as(decoded.version_id()),
                decoded.created_by(),
            )?;
        self.persist(&version)?;
        Ok(version)
    }

    /// Receive an ICS-DES payload.
    ///
    /// The short form id in the header is resolved against local forms. A
    /// form not seen before gets a fresh local id starting with the same
    /// hex digits, so later payloads for it resolve to the same form.
    pub fn import_des(&self, text: &str, received_from: &str) -> Result<Arc<Version>, RelayError> {
        let form = codec::des::decode(text, self.store.catalog())?;

        let (form_id, extensions) = match self.store.find_by_short_id(&form.short_id) {
            Ok(form_id) => {
                let head = self.store.latest(form_id)?;
                (form_id, head.extensions().clone())
            }
            Err(VersionError::UnknownForm(_)) => {
                let form_id = form_id_with_prefix(&form.short_id).ok_or_else(|| {
                    CodecError::Malformed(format!("bad short form id '{}'", form.short_id))
                })?;
                log::info!(
                    "First sight of {} form {}; tracking it as {}",
                    form.form_type,
                    form.short_id,
                    form_id
                );
                (form_id, Default::default())
            }
            Err(e) => return Err(e.into()),
        };

        let version = self.store.receive(
            Incoming {
                form_id,
                form_type: form.form_type,
                fields: form.fields,
                extensions,
                origin_version_id: Some(form.version_id),
                attributes: Default::default(),
            },
            received_from,
        )?;
        log::debug!(
            "Sender's v{} of {} stored as v{}",
            form.version_id,
            form.short_id,
            version.version_id()
        );
        self.persist(&version)?;
        Ok(version)
    }

    /// Receive a delta payload against a locally held base version.
    ///
    /// The base is looked up by the sender's version id, which received
    /// versions carry alongside their local one. A base that never arrived
    /// here is unavailable even when a local version happens to share its
    /// number.
    pub fn import_delta(&self, text: &str, received_from: &str) -> Result<Arc<Version>, RelayError> {
        let delta = codec::delta::decode(text, self.store.catalog())?;
        let form_id = self.store.find_by_short_id(&delta.short_id).map_err(|e| {
            CodecError::BaseVersionUnavailable(format!("form {}: {}", delta.short_id, e))
        })?;
        let instance = self.store.form(form_id)?;
        let base = instance.by_origin(delta.base_version_id).ok_or_else(|| {
            CodecError::BaseVersionUnavailable(format!(
                "sender's v{} of {} was never received",
                delta.base_version_id, delta.short_id
            ))
        })?;
        let fields = codec::delta::apply(&delta, &base)?;

        let version = self.store.receive(
            Incoming {
                form_id,
                form_type: delta.form_type,
                fields,
                extensions: base.extensions().clone(),
                origin_version_id: Some(delta.version_id),
                attributes: Default::default(),
            },
            received_from,
        )?;
        self.persist(&version)?;
        Ok(version)
    }

    /// Archive a version and record the archived set in persistence.
    pub fn archive(&self, form_id: Uuid, version_id: VersionId) -> Result<(), RelayError> {
        self.store.archive(form_id, version_id)?;
        let archived = self.store.form(form_id)?.archived();
        self.persistence.store_archived(form_id, &archived)?;
        Ok(())
    }

    /// Rebuild every persisted form not yet held by the store.
    ///
    /// Archived flags recorded in persistence are applied to the rebuilt
    /// chains. Returns the number of forms restored.
    pub fn restore(&self) -> Result<usize, RelayError> {
        let mut restored = 0;
        for form_id in self.persistence.forms()? {
            if self.store.form(form_id).is_ok() {
                continue;
            }
            let mut versions = Vec::new();
            for version_id in self.persistence.versions(form_id)? {
                let bytes = self.persistence.load(form_id, version_id)?;
                versions.push(codec::canonical::decode(&bytes, self.store.catalog())?);
            }
            if versions.is_empty() {
                continue;
            }
            let instance = self.store.restore(versions)?;
            for version_id in self.persistence.archived(form_id)? {
                if let Err(e) = instance.archive(version_id) {
                    log::warn!("Skipping archived flag of {} v{}: {}", form_id, version_id, e);
                }
            }
            restored += 1;
        }
        log::info!("Restored {} forms from persistence", restored);
        Ok(restored)
    }
}
