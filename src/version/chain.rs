//! The version chain of one form
//!
//! Versions form a total order: each supersedes exactly the one before it,
//! ids run 1, 2, 3, ... without gaps, so id `n` lives at index `n - 1`.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::snapshot::{Version, VersionDraft, VersionId, VersionStatus};
use super::VersionError;

/// Lookup of versions by id, for walking parent links
pub trait Lineage {
    fn version(&self, version_id: VersionId) -> Option<Arc<Version>>;
}

/// Whether `target` descends from (or is) version `base_id`, following
/// parent links through `lineage`.
pub fn descends_from<L: Lineage + ?Sized>(lineage: &L, target: &Version, base_id: VersionId) -> bool {
    if target.version_id() == base_id {
        return true;
    }
    let mut next = target.parent_version_id();
    while let Some(id) = next {
        if id == base_id {
            return true;
        }
        if id < base_id {
            return false;
        }
        next = match lineage.version(id) {
            Some(version) => version.parent_version_id(),
            None => return false,
        };
    }
    false
}

#[derive(Clone, Debug)]
pub struct VersionChain {
    form_id: Uuid,
    form_type: String,
    versions: Vec<Arc<Version>>,
    archived: BTreeSet<VersionId>,
}

impl VersionChain {
    pub fn new(form_id: Uuid, form_type: impl Into<String>) -> Self {
        Self {
            form_id,
            form_type: form_type.into(),
            versions: Vec::new(),
            archived: BTreeSet::new(),
        }
    }

    pub fn form_id(&self) -> Uuid {
        self.form_id
    }

    pub fn form_type(&self) -> &str {
        &self.form_type
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn head(&self) -> Option<&Arc<Version>> {
        self.versions.last()
    }

    pub fn head_id(&self) -> Option<VersionId> {
        self.head().map(|v| v.version_id())
    }

    /// O(1) lookup by id
    pub fn at(&self, version_id: VersionId) -> Option<&Arc<Version>> {
        let index = usize::try_from(version_id).ok()?.checked_sub(1)?;
        self.versions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Version>> {
        self.versions.iter()
    }

    /// Append a new version if the head is still `expected_head`.
    pub(crate) fn append(
        &mut self,
        expected_head: Option<VersionId>,
        draft: VersionDraft,
    ) -> Result<Arc<Version>, VersionError> {
        let head = self.head_id();
        if head != expected_head {
            return Err(VersionError::ConcurrentModification {
                form_id: self.form_id,
                expected: expected_head,
                actual: head,
            });
        }

        let version_id = head.map_or(1, |id| id + 1);
        let version = Arc::new(Version::from_draft(
            self.form_id,
            self.form_type.clone(),
            version_id,
            head,
            draft,
        ));
        self.versions.push(version.clone());
        Ok(version)
    }

    /// Append a version that already carries its identity (rehydration).
    pub(crate) fn push_existing(&mut self, version: Version) -> Result<Arc<Version>, VersionError> {
        if version.form_id() != self.form_id {
            return Err(VersionError::BrokenChain(format!(
                "version of {} cannot join the chain of {}",
                version.form_id(),
                self.form_id
            )));
        }
        if version.form_type() != self.form_type {
            return Err(VersionError::FormTypeMismatch {
                expected: self.form_type.clone(),
                found: version.form_type().to_string(),
            });
        }
        let expected_id = self.head_id().map_or(1, |id| id + 1);
        if version.version_id() != expected_id || version.parent_version_id() != self.head_id() {
            return Err(VersionError::BrokenChain(format!(
                "expected v{} with parent {:?}, found v{} with parent {:?}",
                expected_id,
                self.head_id(),
                version.version_id(),
                version.parent_version_id()
            )));
        }
        let version = Arc::new(version);
        self.versions.push(version.clone());
        Ok(version)
    }

    /// The latest version received under the sender's id `origin`
    pub fn by_origin(&self, origin: VersionId) -> Option<&Arc<Version>> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.origin_version_id() == Some(origin))
    }

    pub fn archived(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.archived.iter().copied()
    }

    pub fn archive(&mut self, version_id: VersionId) -> Result<(), VersionError> {
        if self.at(version_id).is_none() {
            return Err(self.unknown(version_id));
        }
        self.archived.insert(version_id);
        Ok(())
    }

    pub fn status(&self, version_id: VersionId) -> Result<VersionStatus, VersionError> {
        if self.at(version_id).is_none() {
            return Err(self.unknown(version_id));
        }
        Ok(if self.archived.contains(&version_id) {
            VersionStatus::Archived
        } else if self.head_id() == Some(version_id) {
            VersionStatus::Current
        } else {
            VersionStatus::Superseded
        })
    }

    fn unknown(&self, version_id: VersionId) -> VersionError {
        VersionError::UnknownVersion {
            form_id: self.form_id,
            version_id,
        }
    }
}

impl Lineage for VersionChain {
    fn version(&self, version_id: VersionId) -> Option<Arc<Version>> {
        self.at(version_id).cloned()
    }
}

impl Lineage for [Arc<Version>] {
    fn version(&self, version_id: VersionId) -> Option<Arc<Version>> {
        self.iter().find(|v| v.version_id() == version_id).cloned()
    }
}

/// A restartable, lazily read view of a chain, oldest first.
///
/// The view is fixed at the length the chain had when it was taken;
/// later commits do not show up in it.
#[derive(Clone, Debug)]
pub struct History {
    chain: Arc<RwLock<VersionChain>>,
    len: usize,
}

impl History {
    pub(crate) fn new(chain: Arc<RwLock<VersionChain>>) -> Self {
        let len = chain.read().unwrap_or_else(PoisonError::into_inner).len();
        Self { chain, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start (or restart) iteration from the first version
    pub fn iter(&self) -> HistoryIter<'_> {
        HistoryIter {
            history: self,
            next: 0,
        }
    }

    fn get(&self, index: usize) -> Option<Arc<Version>> {
        if index >= self.len {
            return None;
        }
        self.chain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .versions
            .get(index)
            .cloned()
    }
}

impl Lineage for History {
    fn version(&self, version_id: VersionId) -> Option<Arc<Version>> {
        let index = usize::try_from(version_id).ok()?.checked_sub(1)?;
        self.get(index)
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = Arc<Version>;
    type IntoIter = HistoryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct HistoryIter<'a> {
    history: &'a History,
    next: usize,
}

impl Iterator for HistoryIter<'_> {
    type Item = Arc<Version>;

    fn next(&mut self) -> Option<Self::Item> {
        let version = self.history.get(self.next)?;
        self.next += 1;
        Some(version)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.history.len.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}
