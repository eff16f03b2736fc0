//! Codec capability traits.
//!
//! Decoders, encoders, and index sessions are polymorphic over the codec that
//! owns a segment's byte layout. The merge engine only ever talks to these
//! traits; concrete layouts live in the codec modules.

use std::borrow::Cow;
use std::sync::Arc;

use crate::codec::types::{ChunkRef, DocId, HitBuffer, MAX_DOC_ID, TermHit, TermIndexCtx};
use crate::error::Result;
use crate::masked::MaskedDocumentsRegistry;

/// Streaming reader over one term's postings, in strictly ascending document
/// id order.
///
/// A decoder is positioned on a current document after `begin()`; `next()`
/// advances and reports whether a document remains. Hits of the current
/// document are decoded only on request via `materialize_hits`.
pub trait PostingsDecoder: Send {
    /// Position on the first document of the postings list.
    fn begin(&mut self) -> Result<()>;

    /// Document id of the current document.
    fn doc_id(&self) -> DocId;

    /// Number of hits of the current document.
    fn freq(&self) -> u32;

    /// Advance to the next document. Returns false once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Decode the current document's `freq()` hits into `out`, which must
    /// hold at least that many slots.
    fn materialize_hits(&mut self, out: &mut [TermHit]) -> Result<()>;
}

/// Streaming writer for postings, one term at a time.
///
/// Call order per term: `begin_term`, then per document `begin_document`,
/// `new_hit` zero or more times, `end_document`, and finally `end_term`.
/// Document ids must be strictly ascending within a term.
pub trait PostingsEncoder: Send {
    /// Start a new term.
    fn begin_term(&mut self);

    /// Start a new document within the current term.
    fn begin_document(&mut self, doc_id: DocId) -> Result<()>;

    /// Append one hit to the current document.
    fn new_hit(&mut self, pos: u32, payload: &[u8]) -> Result<()>;

    /// Finish the current document.
    fn end_document(&mut self) -> Result<()>;

    /// Finish the term, flush its chunk to the session output, and return the
    /// descriptor of what was written. `documents` is 0 if no document was
    /// emitted between `begin_term` and here.
    fn end_term(&mut self) -> Result<TermIndexCtx>;
}

/// Read access to one segment's postings store.
pub trait PostingsAccessor: Send + Sync + std::fmt::Debug {
    /// Identifier of the codec that encoded this segment.
    fn codec_identifier(&self) -> &str;

    /// Instantiate a decoder for one term's postings.
    fn new_decoder(&self, ctx: &TermIndexCtx) -> Result<Box<dyn PostingsDecoder>>;

    /// Raw bytes of a postings chunk, for byte-level transfer into a
    /// same-codec output session.
    fn read_chunk(&self, chunk: &ChunkRef) -> Result<Cow<'_, [u8]>>;
}

/// One input to a codec-native bulk merge: a source segment, the term's
/// postings descriptor in that segment, and the mask registry to apply.
///
/// The registry is owned: handing a participant to [`IndexSession::merge`]
/// transfers it to the codec.
pub struct MergeParticipant {
    /// Postings store of the source segment.
    pub accessor: Arc<dyn PostingsAccessor>,
    /// The term's postings descriptor within that store.
    pub ctx: TermIndexCtx,
    /// Masks of all generations strictly newer than the source.
    pub masked: MaskedDocumentsRegistry,
}

/// An output segment under construction.
///
/// The session owns the output postings store; encoders created from it
/// append term chunks to that store.
pub trait IndexSession: Send + Sync {
    /// Identifier of the codec this session writes.
    fn codec_identifier(&self) -> &str;

    /// Create an encoder writing into this session's output.
    fn new_encoder(&self) -> Box<dyn PostingsEncoder>;

    /// Byte-level transfer of one term's postings chunk from `src` into the
    /// output. Valid exclusively when `src` uses this session's codec.
    fn append_index_chunk(
        &self,
        src: &dyn PostingsAccessor,
        ctx: &TermIndexCtx,
    ) -> Result<ChunkRef>;

    /// Codec-native merge of one term's postings from several same-codec
    /// segments. Participants arrive in descending generation order and must
    /// be consumed in that order, each filtered through its own registry;
    /// on duplicate document ids the first (newest) participant wins. The
    /// caller brackets this with `begin_term` / `end_term` on `encoder`.
    fn merge(
        &self,
        participants: Vec<MergeParticipant>,
        encoder: &mut dyn PostingsEncoder,
    ) -> Result<()>;

    /// Current byte position of the output postings store.
    fn bytes_written(&self) -> u64;

    /// Advisory durability checkpoint. Implementations may no-op it.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Decode-and-re-encode merge of one term's postings across participants.
///
/// This is the generic routine the in-tree codecs use for
/// [`IndexSession::merge`]: a k-way merge on document id over one decoder per
/// participant. Participants must arrive in descending generation order; at
/// equal document ids the earliest participant in that order wins, provided
/// its registry does not mask the document. Exhausted decoders are dropped
/// immediately, together with the registry each uniquely owns.
pub fn merge_postings(
    participants: Vec<MergeParticipant>,
    encoder: &mut dyn PostingsEncoder,
) -> Result<()> {
    let mut decoders: Vec<(Box<dyn PostingsDecoder>, MaskedDocumentsRegistry)> =
        Vec::with_capacity(participants.len());

    for participant in participants {
        if participant.ctx.documents == 0 {
            continue;
        }

        let mut decoder = participant.accessor.new_decoder(&participant.ctx)?;
        decoder.begin()?;
        decoders.push((decoder, participant.masked));
    }

    let mut hits = HitBuffer::new(128);
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

        assert!(
            lowest != MAX_DOC_ID,
            "decoder produced the sentinel doc id"
        );

        // Decoders stay in descending generation order, so the first one at
        // the lowest id is the newest occurrence of that document.
        let (winner, registry) = &mut decoders[at_lowest[0]];
        if !registry.test(lowest) {
            let freq = winner.freq();
            let buf = hits.reserve(freq);

            winner.materialize_hits(buf)?;
            encoder.begin_document(lowest)?;
            for hit in buf.iter() {
                encoder.new_hit(hit.pos, hit.payload())?;
            }
            encoder.end_document()?;
        }

        // Advance every decoder at the lowest id; the rest were older
        // duplicates. Removal preserves order.
        for &i in at_lowest.iter().rev() {
            if !decoders[i].0.next()? {
                decoders.remove(i);
            }
        }
    }

    Ok(())
}
