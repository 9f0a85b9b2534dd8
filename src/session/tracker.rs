//! Field-level change tracking with linear undo/redo
//!
//! The tracker owns the session's value store and is the only way the
//! session mutates it. Every accepted edit becomes a [`ChangeRecord`]; a
//! cursor separates applied records from undone (redo-able) ones.

use serde::{Deserialize, Serialize};

use super::TrackerError;
use crate::fields::{FieldValue, FieldValueStore};

/// One atomic edit. `None` stands for "unset".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub sequence: u64,
    pub field_id: String,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Clean,
    Dirty,
}

#[derive(Clone, Debug)]
pub struct ChangeTracker {
    store: FieldValueStore,
    records: Vec<ChangeRecord>,
    /// Number of records currently applied
    cursor: usize,
    /// Cursor position at which the store matched its last saved state;
    /// `None` once that position was truncated away.
    clean_at: Option<usize>,
}

impl ChangeTracker {
    pub fn new(store: FieldValueStore) -> Self {
        Self {
            store,
            records: Vec::new(),
            cursor: 0,
            clean_at: Some(0),
        }
    }

    pub fn store(&self) -> &FieldValueStore {
        &self.store
    }

    pub fn into_store(self) -> FieldValueStore {
        self.store
    }

    pub fn state(&self) -> TrackerState {
        if self.clean_at == Some(self.cursor) {
            TrackerState::Clean
        } else {
            TrackerState::Dirty
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == TrackerState::Dirty
    }

    /// Set a field, recording the change.
    pub fn apply(&mut self, field_id: &str, new_value: FieldValue) -> Result<ChangeRecord, TrackerError> {
        self.record(field_id, Some(new_value))
    }

    /// Unset a field, recording the change.
    pub fn clear(&mut self, field_id: &str) -> Result<ChangeRecord, TrackerError> {
        self.record(field_id, None)
    }

    /// Apply a change; a rejected value leaves history and store untouched.
    pub fn record(
        &mut self,
        field_id: &str,
        new_value: Option<FieldValue>,
    ) -> Result<ChangeRecord, TrackerError> {
        let old_value = self.store.put(field_id, new_value.clone())?;

        if self.cursor < self.records.len() {
            self.records.truncate(self.cursor);
            if self.clean_at.map_or(false, |at| at > self.cursor) {
                self.clean_at = None;
            }
        }

        let record = ChangeRecord {
            sequence: self.cursor as u64 + 1,
            field_id: field_id.to_string(),
            old_value,
            new_value,
        };
        self.records.push(record.clone());
        self.cursor += 1;
        Ok(record)
    }

    /// Revert the most recent applied change.
    pub fn undo(&mut self) -> Result<ChangeRecord, TrackerError> {
        if self.cursor == 0 {
            return Err(TrackerError::NothingToUndo);
        }
        let record = self.records[self.cursor - 1].clone();
        self.store.put(&record.field_id, record.old_value.clone())?;
        self.cursor -= 1;
        Ok(record)
    }

    /// Re-apply the most recently undone change.
    pub fn redo(&mut self) -> Result<ChangeRecord, TrackerError> {
        if self.cursor == self.records.len() {
            return Err(TrackerError::NothingToRedo);
        }
        let record = self.records[self.cursor].clone();
        self.store.put(&record.field_id, record.new_value.clone())?;
        self.cursor += 1;
        Ok(record)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.records.len()
    }

    /// Records currently in effect, oldest first
    pub fn pending(&self) -> &[ChangeRecord] {
        &self.records[..self.cursor]
    }

    /// Every record of the session, undone ones included
    pub fn history(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Note that the store now matches saved state. History is kept.
    pub fn mark_clean(&mut self) {
        self.clean_at = Some(self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ics, SchemaCatalog};

    fn tracker() -> ChangeTracker {
        let catalog = SchemaCatalog::standard().unwrap();
        let schema = catalog.lookup(ics::ICS_213).unwrap().clone();
        ChangeTracker::new(FieldValueStore::new(schema))
    }

    #[test]
    fn test_apply_returns_record() {
        let mut tracker = tracker();
        assert_eq!(tracker.state(), TrackerState::Clean);

        let record = tracker.apply("to", FieldValue::text("Ops")).unwrap();
        assert_eq!(record.sequence, 1);
        assert_eq!(record.old_value, None);
        assert_eq!(record.new_value, Some(FieldValue::text("Ops")));
        assert_eq!(tracker.state(), TrackerState::Dirty);

        let record = tracker.apply("to", FieldValue::text("Logistics")).unwrap();
        assert_eq!(record.sequence, 2);
        assert_eq!(record.old_value, Some(FieldValue::text("Ops")));
    }

    #[test]
    fn test_undo_redo() {
        let mut tracker = tracker();
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        tracker.apply("to", FieldValue::text("Logistics")).unwrap();

        tracker.undo().unwrap();
        assert_eq!(tracker.store().value("to"), Some(&FieldValue::text("Ops")));
        tracker.redo().unwrap();
        assert_eq!(tracker.store().value("to"), Some(&FieldValue::text("Logistics")));

        tracker.undo().unwrap();
        tracker.undo().unwrap();
        assert!(tracker.store().is_empty());
        assert_eq!(tracker.state(), TrackerState::Clean);
        assert_eq!(tracker.undo().unwrap_err(), TrackerError::NothingToUndo);
    }

    #[test]
    fn test_nothing_to_redo() {
        let mut tracker = tracker();
        assert_eq!(tracker.redo().unwrap_err(), TrackerError::NothingToRedo);
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        assert_eq!(tracker.redo().unwrap_err(), TrackerError::NothingToRedo);
    }

    #[test]
    fn test_apply_after_undo_truncates() {
        let mut tracker = tracker();
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        tracker.apply("from", FieldValue::text("Planning")).unwrap();
        tracker.undo().unwrap();

        let record = tracker.apply("subject", FieldValue::text("Resupply")).unwrap();
        assert_eq!(record.sequence, 2);
        assert_eq!(tracker.history().len(), 2);
        assert!(!tracker.can_redo());
        assert_eq!(tracker.store().value("from"), None);
    }

    #[test]
    fn test_rejected_change_not_recorded() {
        let mut tracker = tracker();
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        let err = tracker.apply("date", FieldValue::text("today")).unwrap_err();
        assert!(matches!(err, TrackerError::Field(_)));
        assert_eq!(tracker.history().len(), 1);
    }

    #[test]
    fn test_clear_is_undoable() {
        let mut tracker = tracker();
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        let record = tracker.clear("to").unwrap();
        assert_eq!(record.new_value, None);
        assert_eq!(tracker.store().value("to"), None);
        tracker.undo().unwrap();
        assert_eq!(tracker.store().value("to"), Some(&FieldValue::text("Ops")));
    }

    #[test]
    fn test_mark_clean_keeps_history() {
        let mut tracker = tracker();
        tracker.apply("to", FieldValue::text("Ops")).unwrap();
        tracker.mark_clean();
        assert_eq!(tracker.state(), TrackerState::Clean);
        assert_eq!(tracker.history().len(), 1);

        tracker.undo().unwrap();
        assert_eq!(tracker.state(), TrackerState::Dirty);
        tracker.apply("from", FieldValue::text("Planning")).unwrap();
        tracker.undo().unwrap();
        // The saved position was truncated away; nothing is clean anymore.
        assert_eq!(tracker.state(), TrackerState::Dirty);
    }
}
