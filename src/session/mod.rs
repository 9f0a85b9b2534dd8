//! Editing sessions
//!
//! A session is the transient context between opening a form for edit and
//! committing or discarding. It owns a value store seeded from the chain
//! head (or empty, for a new form) and the change tracker over it, and it
//! remembers which head it was based on so the commit can detect
//! concurrent modification.

mod tracker;

pub use tracker::{ChangeRecord, ChangeTracker, TrackerState};

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::fields::{FieldError, FieldMap, FieldValue, FieldValueStore, Slot, ValidationReport};
use crate::schema::FormSchema;
use crate::version::{Version, VersionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error(transparent)]
    Field(#[from] FieldError),
}

impl TrackerError {
    /// Undo/redo at the end of history; the session is unchanged.
    pub fn is_benign(&self) -> bool {
        matches!(self, TrackerError::NothingToUndo | TrackerError::NothingToRedo)
    }
}

/// One editing session over one form.
#[derive(Debug)]
pub struct EditSession {
    form_id: Uuid,
    base: Option<Arc<Version>>,
    tracker: ChangeTracker,
}

impl EditSession {
    /// A session for a form that has no versions yet
    pub(crate) fn fresh(form_id: Uuid, schema: Arc<FormSchema>) -> Self {
        Self {
            form_id,
            base: None,
            tracker: ChangeTracker::new(FieldValueStore::new(schema)),
        }
    }

    /// A session seeded from an existing version
    pub(crate) fn from_version(
        schema: Arc<FormSchema>,
        version: Arc<Version>,
    ) -> Result<Self, FieldError> {
        let store = seeded_store(schema, &version)?;
        Ok(Self {
            form_id: version.form_id(),
            base: Some(version),
            tracker: ChangeTracker::new(store),
        })
    }

    pub fn form_id(&self) -> Uuid {
        self.form_id
    }

    pub fn form_type(&self) -> &str {
        self.tracker.store().form_type()
    }

    /// The version this session started from, if any
    pub fn base(&self) -> Option<&Arc<Version>> {
        self.base.as_ref()
    }

    /// Chain head the session expects at commit time
    pub fn base_version_id(&self) -> Option<VersionId> {
        self.base.as_ref().map(|v| v.version_id())
    }

    pub fn apply(&mut self, field_id: &str, value: FieldValue) -> Result<ChangeRecord, TrackerError> {
        self.tracker.apply(field_id, value)
    }

    pub fn clear(&mut self, field_id: &str) -> Result<ChangeRecord, TrackerError> {
        self.tracker.clear(field_id)
    }

    pub fn undo(&mut self) -> Result<ChangeRecord, TrackerError> {
        self.tracker.undo()
    }

    pub fn redo(&mut self) -> Result<ChangeRecord, TrackerError> {
        self.tracker.redo()
    }

    pub fn get(&self, field_id: &str) -> Result<Slot<'_>, FieldError> {
        self.tracker.store().get(field_id)
    }

    pub fn store(&self) -> &FieldValueStore {
        self.tracker.store()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn validate(&self) -> ValidationReport {
        self.tracker.store().validate()
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    /// Move the session onto a newer head, re-applying the unsaved edits.
    ///
    /// Used after a commit failed with concurrent modification. The unsaved
    /// edits are the fields whose value differs from the base version; only
    /// those are written over the new head, so values the head took from a
    /// concurrent writer survive. The re-applied edits get fresh sequence
    /// numbers and the old history is dropped.
    pub fn rebase(&mut self, head: Arc<Version>) -> Result<(), TrackerError> {
        if head.form_id() != self.form_id {
            return Err(FieldError::violation(
                "form_id",
                format!("cannot rebase {} onto a version of {}", self.form_id, head.form_id()),
            )
            .into());
        }

        let schema = self.tracker.store().schema().clone();
        let mut tracker = ChangeTracker::new(seeded_store(schema, &head)?);
        for (field_id, value) in self.unsaved_edits() {
            if tracker.store().value(&field_id) != value.as_ref() {
                tracker.record(&field_id, value)?;
            }
        }

        log::debug!(
            "Rebased session on {} from {:?} to v{} ({} edits replayed)",
            self.form_id,
            self.base_version_id(),
            head.version_id(),
            tracker.pending().len()
        );
        self.base = Some(head);
        self.tracker = tracker;
        Ok(())
    }

    /// Fields whose current value differs from the base version, in field
    /// id order; `None` marks a field cleared since the base.
    fn unsaved_edits(&self) -> Vec<(String, Option<FieldValue>)> {
        let current = self.tracker.store().values();
        let empty = FieldMap::new();
        let saved = self.base.as_ref().map_or(&empty, |v| v.fields());

        let field_ids: BTreeSet<&String> = current.keys().chain(saved.keys()).collect();
        field_ids
            .into_iter()
            .filter(|field_id| current.get(*field_id) != saved.get(*field_id))
            .map(|field_id| (field_id.clone(), current.get(field_id).cloned()))
            .collect()
    }

    /// Record a successful commit: the new version becomes the base.
    pub(crate) fn committed(&mut self, version: Arc<Version>) {
        self.base = Some(version);
        self.tracker.mark_clean();
    }
}

fn seeded_store(schema: Arc<FormSchema>, version: &Version) -> Result<FieldValueStore, FieldError> {
    FieldValueStore::from_values(schema, version.fields().clone(), version.extensions().clone())
}
