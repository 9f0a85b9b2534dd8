//! Persistence adapters
//!
//! The core never does I/O itself. Committed versions are handed to a
//! [`FormPersistence`] as canonical bytes and read back the same way.
//! Stored versions are immutable: writing different bytes under an existing
//! `(form_id, version_id)` is refused.

mod directory;

pub use directory::DirectoryPersistence;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use uuid::Uuid;

use crate::version::VersionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version {version_id} of {form_id} is already stored with different content")]
    Conflict { form_id: Uuid, version_id: VersionId },
}

/// Storage for canonical version documents.
pub trait FormPersistence: Send + Sync {
    fn store(&self, form_id: Uuid, version_id: VersionId, canonical: &[u8]) -> Result<(), PersistError>;
    fn load(&self, form_id: Uuid, version_id: VersionId) -> Result<Vec<u8>, PersistError>;
    /// Stored version ids of a form, ascending
    fn versions(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError>;
    fn forms(&self) -> Result<Vec<Uuid>, PersistError>;
    /// Replace the recorded set of archived versions of a form
    fn store_archived(&self, form_id: Uuid, archived: &[VersionId]) -> Result<(), PersistError>;
    /// Archived version ids of a form, ascending; empty when none were recorded
    fn archived(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError>;
}

/// In-memory persistence for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    documents: RwLock<HashMap<Uuid, BTreeMap<VersionId, Vec<u8>>>>,
    archived: RwLock<HashMap<Uuid, BTreeSet<VersionId>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormPersistence for MemoryPersistence {
    fn store(&self, form_id: Uuid, version_id: VersionId, canonical: &[u8]) -> Result<(), PersistError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let versions = documents.entry(form_id).or_default();
        match versions.get(&version_id) {
            Some(existing) if existing.as_slice() != canonical => {
                Err(PersistError::Conflict { form_id, version_id })
            }
            Some(_) => Ok(()),
            None => {
                versions.insert(version_id, canonical.to_vec());
                Ok(())
            }
        }
    }

    fn load(&self, form_id: Uuid, version_id: VersionId) -> Result<Vec<u8>, PersistError> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&form_id)
            .and_then(|versions| versions.get(&version_id))
            .cloned()
            .ok_or_else(|| PersistError::NotFound(format!("{} v{}", form_id, version_id)))
    }

    fn versions(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&form_id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    fn forms(&self) -> Result<Vec<Uuid>, PersistError> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect())
    }

    fn store_archived(&self, form_id: Uuid, archived: &[VersionId]) -> Result<(), PersistError> {
        self.archived
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(form_id, archived.iter().copied().collect());
        Ok(())
    }

    fn archived(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError> {
        Ok(self
            .archived
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&form_id)
            .map(|archived| archived.iter().copied().collect())
            .unwrap_or_default())
    }
}
