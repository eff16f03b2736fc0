//! Masked (logically deleted) document tracking.
//!
//! Each generation carries an immutable set of document ids it has deleted.
//! While merging, a [`MaskedDocumentsRegistry`] composes the sets of all
//! generations *strictly newer* than the one being scanned, so that newer
//! deletions suppress older postings but never the other way around.

use std::sync::Arc;

use ahash::AHashSet;

use crate::codec::types::DocId;

/// The set of document ids deleted by one generation.
///
/// Immutable for the duration of any merge that borrows it.
#[derive(Debug, Clone, Default)]
pub struct MaskedDocuments {
    ids: AHashSet<DocId>,
}

impl MaskedDocuments {
    /// Create an empty set.
    pub fn new() -> Self {
        MaskedDocuments::default()
    }

    /// Mark a document as deleted. Returns false if it already was.
    pub fn insert(&mut self, doc_id: DocId) -> bool {
        self.ids.insert(doc_id)
    }

    /// Check whether a document is deleted.
    pub fn contains(&self, doc_id: DocId) -> bool {
        self.ids.contains(&doc_id)
    }

    /// Number of deleted documents.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if no document is deleted.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<DocId> for MaskedDocuments {
    fn from_iter<T: IntoIterator<Item = DocId>>(iter: T) -> Self {
        MaskedDocuments {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Membership test composed from the mask sets of strictly newer generations.
///
/// Construction shares the underlying sets instead of copying them, so a
/// registry is cheap to create and drop. The merge coordinator hands
/// registries by value into codec-native bulk merges; everywhere else it
/// keeps ownership itself.
#[derive(Debug, Default)]
pub struct MaskedDocumentsRegistry {
    masks: Vec<Arc<MaskedDocuments>>,
}

impl MaskedDocumentsRegistry {
    /// Build a registry over the given mask sets.
    pub fn new(masks: &[Arc<MaskedDocuments>]) -> Self {
        MaskedDocumentsRegistry {
            masks: masks.to_vec(),
        }
    }

    /// True if any composed mask set deletes `doc_id`.
    pub fn test(&self, doc_id: DocId) -> bool {
        self.masks.iter().any(|mask| mask.contains(doc_id))
    }

    /// True if the registry composes no mask sets; `test` is then always
    /// false and byte-level merge fast paths become valid.
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}
