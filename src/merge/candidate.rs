//! Merge candidates and the candidate collection.
//!
//! A [`MergeCandidatesCollection`] owns the set of input segments for one
//! merge. `commit()` fixes the processing order (generation descending) and
//! precomputes the mask-prefix structure that lets the coordinator build the
//! right deletion overlay for each candidate in O(1): while walking the
//! committed order, the mask sets seen *before* candidate `i` are exactly
//! those of generations strictly newer than `i`.

use std::sync::Arc;

use crate::codec::traits::PostingsAccessor;
use crate::codec::types::Generation;
use crate::masked::{MaskedDocuments, MaskedDocumentsRegistry};
use crate::terms::TermIterator;

/// One input to a merge: a source segment generation, its term stream, its
/// postings store, and the documents its generation has deleted.
pub struct MergeCandidate {
    /// Generation number of the source segment; larger is newer. Must be
    /// unique within one collection.
    pub generation: Generation,

    /// The segment's term stream, lexicographically ascending. `None` for
    /// mask-only candidates.
    pub terms: Option<Box<dyn TermIterator>>,

    /// The segment's postings store. A candidate without one is mask-only:
    /// it contributes its deletion mask and nothing else, and by construction
    /// has no term stream to iterate.
    pub accessor: Option<Arc<dyn PostingsAccessor>>,

    /// Documents deleted by this candidate's generation. Applies to strictly
    /// older candidates only, never to this candidate's own postings.
    pub masked_documents: Option<Arc<MaskedDocuments>>,
}

impl MergeCandidate {
    /// Create a full candidate contributing terms, postings, and optionally
    /// a deletion mask.
    pub fn new(
        generation: Generation,
        terms: Box<dyn TermIterator>,
        accessor: Arc<dyn PostingsAccessor>,
        masked_documents: Option<Arc<MaskedDocuments>>,
    ) -> Self {
        MergeCandidate {
            generation,
            terms: Some(terms),
            accessor: Some(accessor),
            masked_documents,
        }
    }

    /// Create a mask-only candidate: its generation participates in the
    /// deletion overlay but contributes no postings.
    pub fn mask_only(generation: Generation, masked_documents: Arc<MaskedDocuments>) -> Self {
        MergeCandidate {
            generation,
            terms: None,
            accessor: None,
            masked_documents: Some(masked_documents),
        }
    }
}

/// The ordered set of input segments for one merge.
#[derive(Default)]
pub struct MergeCandidatesCollection {
    pub(crate) candidates: Vec<MergeCandidate>,
    /// Non-empty mask sets in committed (generation descending) order.
    all: Vec<Arc<MaskedDocuments>>,
    /// Per candidate, the prefix length into `all` covering all strictly
    /// newer generations.
    map: Vec<usize>,
    committed: bool,
}

impl MergeCandidatesCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        MergeCandidatesCollection::default()
    }

    /// Add a candidate. Invalidates any previous `commit()`.
    pub fn add_candidate(&mut self, candidate: MergeCandidate) {
        self.candidates.push(candidate);
        self.committed = false;
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True if the collection holds no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Sort candidates by generation descending and rebuild the mask-prefix
    /// structure. Must run before `scanner_registry_for` or `merge`.
    pub fn commit(&mut self) {
        self.candidates
            .sort_by(|a, b| b.generation.cmp(&a.generation));

        self.map.clear();
        self.all.clear();

        for candidate in &self.candidates {
            // The candidate's own mask lands after its prefix mark, so the
            // prefix covers strictly newer generations only.
            self.map.push(self.all.len());

            if let Some(mask) = &candidate.masked_documents {
                if !mask.is_empty() {
                    self.all.push(Arc::clone(mask));
                }
            }
        }

        self.committed = true;
    }

    /// Build the deletion overlay for the candidate at committed position
    /// `idx`: a registry over the mask sets of all strictly newer
    /// generations.
    pub fn scanner_registry_for(&self, idx: usize) -> MaskedDocumentsRegistry {
        assert!(
            self.committed,
            "commit() must run before scanner_registry_for()"
        );

        MaskedDocumentsRegistry::new(&self.all[..self.map[idx]])
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.committed
    }
}
