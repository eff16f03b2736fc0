//! Term-stream merge coordinator.
//!
//! [`MergeCandidatesCollection::merge`] runs a k-way lexicographic merge over
//! the candidates' term streams. Each iteration selects the smallest current
//! term, groups the candidates that share it, emits (or drops) one output
//! term, advances the grouped candidates, and repeats until the working set
//! is empty. Per term group there are three ways to produce output postings:
//!
//! * a byte-level chunk copy, when a lone candidate shares the output codec
//!   and no newer generation masks any of its documents;
//! * the output codec's native bulk merge, when all grouped candidates share
//!   the output codec;
//! * a decode/re-encode merge across per-candidate decoders otherwise.
//!
//! Output terms come out in strict lexicographic order — distinct from an
//! index build session, whose term order follows interned term ids — and
//! output documents per term in strict ascending id order, the newest
//! generation winning duplicates.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::codec::traits::{
    IndexSession, MergeParticipant, PostingsAccessor, PostingsDecoder, PostingsEncoder,
};
use crate::codec::types::{HitBuffer, MAX_DOC_ID, TermIndexCtx};
use crate::error::Result;
use crate::masked::MaskedDocumentsRegistry;
use crate::merge::candidate::MergeCandidatesCollection;
use crate::terms::TermEntry;

/// Configuration for merge operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Advisory durability checkpoint: ask the output session to flush once
    /// this many bytes have been written since the last checkpoint. 0
    /// disables the hint.
    pub flush_every_bytes: u64,

    /// Extra capacity added whenever the reusable hit buffer grows.
    pub hit_buffer_slack: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            flush_every_bytes: 0,
            hit_buffer_slack: 128,
        }
    }
}

/// Statistics about one merge invocation.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Terms written to the output dictionary.
    pub terms_emitted: u64,

    /// Terms skipped or dropped because no document survived.
    pub terms_dropped: u64,

    /// Documents written to the output segment.
    pub docs_emitted: u64,

    /// Documents suppressed by deletion masks on the coordinator's own
    /// decode paths (codec-native bulk merges apply masks internally and are
    /// not counted here).
    pub docs_masked: u64,

    /// Terms transferred by byte-level chunk copy.
    pub chunks_appended: u64,

    /// Term groups handed to the output codec's native merge.
    pub bulk_merges: u64,

    /// Terms re-encoded through decoders.
    pub terms_reencoded: u64,

    /// Final byte position of the output session.
    pub bytes_written: u64,
}

impl MergeCandidatesCollection {
    /// Merge all committed candidates into `session`, appending the output
    /// term dictionary to `terms`.
    ///
    /// Term bytes are copied out of the input iterators, so the entries
    /// outlive the candidates. A term is emitted iff at least one unmasked
    /// document survives for it.
    ///
    /// # Panics
    ///
    /// Panics on invariant breaches: `commit()` not run, 65535 or more
    /// candidates, duplicate generations, a term stream out of lexicographic
    /// order, or a decoder surfacing the sentinel doc id.
    pub fn merge(
        &mut self,
        session: &dyn IndexSession,
        terms: &mut Vec<TermEntry>,
        config: &MergeConfig,
    ) -> Result<MergeStats> {
        assert!(self.is_committed(), "commit() must run before merge()");
        assert!(
            self.candidates.len() < u16::MAX as usize,
            "too many merge candidates"
        );
        for pair in self.candidates.windows(2) {
            assert!(
                pair[1].generation < pair[0].generation,
                "candidate generations must be unique"
            );
        }

        let mut stats = MergeStats::default();

        // Working set: committed positions of candidates that actually have
        // terms to contribute. A candidate without a postings accessor is
        // mask-only; its mask stays in the overlay but it is never iterated.
        let mut active: Vec<usize> = (0..self.candidates.len())
            .filter(|&idx| {
                let candidate = &self.candidates[idx];
                candidate.accessor.is_some()
                    && candidate.terms.as_deref().is_some_and(|t| !t.done())
            })
            .collect();

        if active.is_empty() {
            stats.bytes_written = session.bytes_written();
            return Ok(stats);
        }

        let out_codec = session.codec_identifier();
        let mut encoder = session.new_encoder();
        let mut hits = HitBuffer::new(config.hit_buffer_slack);
        let mut to_advance: Vec<usize> = Vec::with_capacity(active.len());
        let mut last_term: Option<Vec<u8>> = None;
        let mut last_flush = session.bytes_written();

        while !active.is_empty() {
            // Selection: smallest current term across the working set, plus
            // the working-set positions tied at it. Track along the way
            // whether every tied candidate shares one codec.
            to_advance.clear();
            to_advance.push(0);

            let (mut selected_term, mut selected_ctx) = {
                let (term, ctx) = self.cur_of(active[0]);
                (term.to_vec(), *ctx)
            };
            let mut group_codec = self.codec_of(active[0]);
            let mut same_codec = true;

            for pos in 1..active.len() {
                let (term, ctx) = self.cur_of(active[pos]);

                match term.cmp(selected_term.as_slice()) {
                    Ordering::Less => {
                        selected_term.clear();
                        selected_term.extend_from_slice(term);
                        selected_ctx = *ctx;
                        to_advance.clear();
                        to_advance.push(pos);
                        group_codec = self.codec_of(active[pos]);
                        same_codec = true;
                    }
                    Ordering::Equal => {
                        if same_codec && self.codec_of(active[pos]) != group_codec {
                            same_codec = false;
                        }
                        to_advance.push(pos);
                    }
                    Ordering::Greater => {}
                }
            }

            if let Some(last) = &last_term {
                assert!(
                    selected_term.as_slice() > last.as_slice(),
                    "term streams out of lexicographic order"
                );
            }

            let fast_path = same_codec && group_codec == out_codec;
            trace!(
                "term group: {} candidates, fast_path = {fast_path}",
                to_advance.len()
            );

            if to_advance.len() == 1 {
                let cand_idx = active[to_advance[0]];
                let registry = self.scanner_registry_for(cand_idx);

                if selected_ctx.documents == 0 {
                    // Valid but unusual: a term indexed with no documents.
                    debug!("term with 0 documents, skipping");
                    stats.terms_dropped += 1;
                } else if fast_path && registry.is_empty() {
                    let accessor = self.accessor_of(cand_idx);
                    let chunk = session.append_index_chunk(accessor.as_ref(), &selected_ctx)?;

                    terms.push((
                        selected_term.clone().into_boxed_slice(),
                        TermIndexCtx {
                            documents: selected_ctx.documents,
                            chunk,
                        },
                    ));
                    stats.terms_emitted += 1;
                    stats.chunks_appended += 1;
                    stats.docs_emitted += u64::from(selected_ctx.documents);
                } else {
                    let tctx = self.reencode_one(
                        cand_idx,
                        &selected_ctx,
                        &registry,
                        encoder.as_mut(),
                        &mut hits,
                        &mut stats,
                    )?;

                    stats.terms_reencoded += 1;
                    if tctx.documents > 0 {
                        terms.push((selected_term.clone().into_boxed_slice(), tctx));
                        stats.terms_emitted += 1;
                        stats.docs_emitted += u64::from(tctx.documents);
                    } else {
                        stats.terms_dropped += 1;
                    }
                }
            } else if fast_path {
                // Same codec throughout the group: hand the whole group to
                // the output codec, registries included.
                let mut participants = Vec::with_capacity(to_advance.len());

                for &pos in &to_advance {
                    let cand_idx = active[pos];
                    let (_, ctx) = self.cur_of(cand_idx);
                    let ctx = *ctx;

                    if ctx.documents == 0 {
                        debug!("term with 0 documents in group, skipping candidate");
                        continue;
                    }

                    participants.push(MergeParticipant {
                        accessor: self.accessor_of(cand_idx).clone(),
                        ctx,
                        masked: self.scanner_registry_for(cand_idx),
                    });
                }

                if participants.is_empty() {
                    stats.terms_dropped += 1;
                } else {
                    encoder.begin_term();
                    session.merge(participants, encoder.as_mut())?;
                    let tctx = encoder.end_term()?;

                    stats.bulk_merges += 1;
                    if tctx.documents > 0 {
                        terms.push((selected_term.clone().into_boxed_slice(), tctx));
                        stats.terms_emitted += 1;
                        stats.docs_emitted += u64::from(tctx.documents);
                    } else {
                        stats.terms_dropped += 1;
                    }
                }
            } else {
                // Mixed codecs: merge-sort across per-candidate decoders and
                // re-encode into the output codec.
                let mut decoders: Vec<(Box<dyn PostingsDecoder>, MaskedDocumentsRegistry)> =
                    Vec::with_capacity(to_advance.len());

                for &pos in &to_advance {
                    let cand_idx = active[pos];
                    let (_, ctx) = self.cur_of(cand_idx);
                    let ctx = *ctx;

                    if ctx.documents == 0 {
                        debug!("term with 0 documents in group, skipping candidate");
                        continue;
                    }

                    let mut decoder = self.accessor_of(cand_idx).new_decoder(&ctx)?;
                    decoder.begin()?;
                    decoders.push((decoder, self.scanner_registry_for(cand_idx)));
                }

                if decoders.is_empty() {
                    stats.terms_dropped += 1;
                } else {
                    encoder.begin_term();
                    self.merge_decoders(&mut decoders, encoder.as_mut(), &mut hits, &mut stats)?;
                    let tctx = encoder.end_term()?;

                    stats.terms_reencoded += 1;
                    if tctx.documents > 0 {
                        terms.push((selected_term.clone().into_boxed_slice(), tctx));
                        stats.terms_emitted += 1;
                        stats.docs_emitted += u64::from(tctx.documents);
                    } else {
                        stats.terms_dropped += 1;
                    }
                }
            }

            if config.flush_every_bytes > 0 {
                let written = session.bytes_written();

                if written.saturating_sub(last_flush) >= config.flush_every_bytes {
                    session.flush()?;
                    last_flush = written;
                }
            }

            // Advance every candidate that contributed the selected term,
            // dropping exhausted ones from the working set in place.
            for &pos in to_advance.iter().rev() {
                let cand_idx = active[pos];
                let candidate = &mut self.candidates[cand_idx];
                let stream = candidate
                    .terms
                    .as_deref_mut()
                    .expect("working-set candidate lost its term stream");

                stream.next();
                if stream.done() {
                    active.remove(pos);
                }
            }

            last_term = Some(selected_term);
        }

        stats.bytes_written = session.bytes_written();
        Ok(stats)
    }

    /// Re-encode a single candidate's postings for one term, filtering
    /// through the candidate's deletion overlay.
    fn reencode_one(
        &self,
        cand_idx: usize,
        ctx: &TermIndexCtx,
        registry: &MaskedDocumentsRegistry,
        encoder: &mut dyn PostingsEncoder,
        hits: &mut HitBuffer,
        stats: &mut MergeStats,
    ) -> Result<TermIndexCtx> {
        let accessor = self.accessor_of(cand_idx);
        let mut decoder = accessor.new_decoder(ctx)?;
        decoder.begin()?;

        encoder.begin_term();
        loop {
            let doc_id = decoder.doc_id();
            assert!(doc_id != MAX_DOC_ID, "decoder produced the sentinel doc id");

            if registry.test(doc_id) {
                stats.docs_masked += 1;
            } else {
                let freq = decoder.freq();
                let buf = hits.reserve(freq);
                decoder.materialize_hits(buf)?;

                encoder.begin_document(doc_id)?;
                for hit in buf.iter() {
                    encoder.new_hit(hit.pos, hit.payload())?;
                }
                encoder.end_document()?;
            }

            if !decoder.next()? {
                break;
            }
        }

        encoder.end_term()
    }

    /// Nested k-way merge on document id across decoders of mixed codecs.
    ///
    /// Decoders arrive (and stay) in descending generation order, so at
    /// duplicate document ids the first decoder holds the newest occurrence:
    /// it alone may emit, and every decoder at that id advances past it.
    fn merge_decoders(
        &self,
        decoders: &mut Vec<(Box<dyn PostingsDecoder>, MaskedDocumentsRegistry)>,
        encoder: &mut dyn PostingsEncoder,
        hits: &mut HitBuffer,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let mut at_lowest = Vec::with_capacity(decoders.len());

        while !decoders.is_empty() {
            let mut lowest = decoders[0].0.doc_id();

            at_lowest.clear();
            at_lowest.push(0);
            for (i, (decoder, _)) in decoders.iter().enumerate().skip(1) {
                let doc_id = decoder.doc_id();

                if doc_id < lowest {
                    lowest = doc_id;
                    at_lowest.clear();
                    at_lowest.push(i);
                } else if doc_id == lowest {
                    at_lowest.push(i);
                }
            }

            assert!(lowest != MAX_DOC_ID, "decoder produced the sentinel doc id");

            let (winner, registry) = &mut decoders[at_lowest[0]];
            if registry.test(lowest) {
                stats.docs_masked += 1;
            } else {
                let freq = winner.freq();
                let buf = hits.reserve(freq);
                winner.materialize_hits(buf)?;

                encoder.begin_document(lowest)?;
                for hit in buf.iter() {
                    encoder.new_hit(hit.pos, hit.payload())?;
                }
                encoder.end_document()?;
            }

            // Advance every decoder at the lowest id; exhausted ones are
            // dropped together with their registry, preserving order.
            for &i in at_lowest.iter().rev() {
                if !decoders[i].0.next()? {
                    decoders.remove(i);
                }
            }
        }

        Ok(())
    }

    fn cur_of(&self, idx: usize) -> (&[u8], &TermIndexCtx) {
        self.candidates[idx]
            .terms
            .as_deref()
            .expect("working-set candidate lost its term stream")
            .cur()
    }

    fn codec_of(&self, idx: usize) -> &str {
        self.accessor_of(idx).codec_identifier()
    }

    fn accessor_of(&self, idx: usize) -> &Arc<dyn PostingsAccessor> {
        self.candidates[idx]
            .accessor
            .as_ref()
            .expect("working-set candidate lost its accessor")
    }
}
