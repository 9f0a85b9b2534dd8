//! On-disk persistence
//!
//! Stores each version as `{root}/{form_id}/{version_id:06}.json`, with the
//! archived version ids of a form in `{root}/{form_id}/archived.json`.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{FormPersistence, PersistError};
use crate::version::VersionId;

fn io_error(e: std::io::Error) -> PersistError {
    PersistError::IoError(e.to_string())
}

pub struct DirectoryPersistence {
    root: PathBuf,
}

impl DirectoryPersistence {
    /// Use `root` as the storage directory; it is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn form_dir(&self, form_id: Uuid) -> PathBuf {
        self.root.join(form_id.to_string())
    }

    fn version_path(&self, form_id: Uuid, version_id: VersionId) -> PathBuf {
        self.form_dir(form_id).join(format!("{:06}.json", version_id))
    }

    fn archived_path(&self, form_id: Uuid) -> PathBuf {
        self.form_dir(form_id).join(ARCHIVED_FILE)
    }
}

const ARCHIVED_FILE: &str = "archived.json";

impl FormPersistence for DirectoryPersistence {
    fn store(&self, form_id: Uuid, version_id: VersionId, canonical: &[u8]) -> Result<(), PersistError> {
        let path = self.version_path(form_id, version_id);
        if path.exists() {
            let existing = std::fs::read(&path).map_err(io_error)?;
            if existing != canonical {
                return Err(PersistError::Conflict { form_id, version_id });
            }
            return Ok(());
        }

        std::fs::create_dir_all(self.form_dir(form_id)).map_err(io_error)?;
        std::fs::write(&path, canonical).map_err(io_error)?;
        log::debug!("Stored {} v{} at {}", form_id, version_id, path.display());
        Ok(())
    }

    fn load(&self, form_id: Uuid, version_id: VersionId) -> Result<Vec<u8>, PersistError> {
        let path = self.version_path(form_id, version_id);
        if !path.exists() {
            return Err(PersistError::NotFound(format!("{} v{}", form_id, version_id)));
        }
        std::fs::read(&path).map_err(io_error)
    }

    fn versions(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError> {
        let dir = self.form_dir(form_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json")
                || path.file_name().and_then(|name| name.to_str()) == Some(ARCHIVED_FILE)
            {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<VersionId>().ok())
            {
                Some(version_id) => versions.push(version_id),
                None => log::warn!("Ignoring stray file {}", path.display()),
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn forms(&self) -> Result<Vec<Uuid>, PersistError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut forms = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(form_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            {
                forms.push(form_id);
            }
        }
        forms.sort_unstable();
        Ok(forms)
    }

    fn store_archived(&self, form_id: Uuid, archived: &[VersionId]) -> Result<(), PersistError> {
        let mut archived = archived.to_vec();
        archived.sort_unstable();
        archived.dedup();
        let bytes = serde_json::to_vec(&archived).map_err(|e| PersistError::IoError(e.to_string()))?;

        std::fs::create_dir_all(self.form_dir(form_id)).map_err(io_error)?;
        std::fs::write(self.archived_path(form_id), bytes).map_err(io_error)?;
        log::debug!("Recorded {} archived versions of {}", archived.len(), form_id);
        Ok(())
    }

    fn archived(&self, form_id: Uuid) -> Result<Vec<VersionId>, PersistError> {
        let path = self.archived_path(form_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&path).map_err(io_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PersistError::IoError(format!("{}: {}", path.display(), e)))
    }
}
