//! Post-merge disposition of tracked index sources.
//!
//! After a merge, each previously tracked generation falls into one of three
//! classes: untouched by the merge, subsumed but still needed for its
//! deletion metadata, or fully disposable. The middle class exists because a
//! merged generation's deletions must keep suppressing documents in older
//! generations that did *not* participate in the merge.

use ahash::AHashSet;

use crate::codec::types::Generation;
use crate::merge::candidate::MergeCandidatesCollection;

/// What to do with a tracked index source after this merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSourceRetention {
    /// Untouched by this merge; keep postings and deletion metadata.
    RetainAll,

    /// Postings are subsumed by the merge output, but an older non-merged
    /// generation still needs this source's deletion metadata.
    RetainDocumentIdsUpdates,

    /// Fully subsumed; the source can be deleted.
    Delete,
}

impl MergeCandidatesCollection {
    /// Classify every tracked generation against this merge's candidate set.
    ///
    /// `tracked` is the full list of generations the repository currently
    /// tracks; it is sorted ascending before classification and the result
    /// follows that order. Classification depends only on the candidate set
    /// and the tracked list.
    pub fn consider_tracked_sources(
        &self,
        mut tracked: Vec<Generation>,
    ) -> Vec<(Generation, IndexSourceRetention)> {
        let candidate_gens: AHashSet<Generation> =
            self.candidates.iter().map(|c| c.generation).collect();

        tracked.sort_unstable();

        let mut result = Vec::with_capacity(tracked.len());
        let mut seen_non_candidate = false;

        for generation in tracked {
            if !candidate_gens.contains(&generation) {
                seen_non_candidate = true;
                result.push((generation, IndexSourceRetention::RetainAll));
            } else if seen_non_candidate {
                // An older tracked generation survives this merge, so it
                // still sees this candidate's deletions.
                result.push((generation, IndexSourceRetention::RetainDocumentIdsUpdates));
            } else {
                result.push((generation, IndexSourceRetention::Delete));
            }
        }

        result
    }
}
