//! Fixed-width postings codec.
//!
//! Chunk layout, per term: for each document a little-endian u32 document id
//! (absolute, not delta-compressed) and a u32 frequency, followed by that
//! document's hits as (u32 position, u8 payload length, payload bytes).
//! Chunks carry no positional state, so they move between same-codec
//! segments byte-for-byte. The layout trades space for decode simplicity and
//! exists mainly so cross-codec merges run against a genuinely different
//! encoding than `vint`.

use std::borrow::Cow;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use parking_lot::RwLock;

use crate::codec::traits::{
    IndexSession, MergeParticipant, PostingsAccessor, PostingsDecoder, PostingsEncoder,
    merge_postings,
};
use crate::codec::types::{ChunkRef, DocId, MAX_HIT_PAYLOAD, TermHit, TermIndexCtx};
use crate::error::{Result, XystonError};
use crate::terms::TermEntry;

/// Codec identifier of the fixed-width codec.
pub const PLAIN_CODEC: &str = "plain1";

/// Immutable postings store of one `plain`-encoded segment.
#[derive(Debug, Clone)]
pub struct PlainSegment {
    data: Arc<[u8]>,
}

impl PlainSegment {
    /// Wrap a finished postings store.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PlainSegment { data: bytes.into() }
    }

    /// Size of the postings store in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn chunk_range(&self, chunk: &ChunkRef) -> Result<(usize, usize)> {
        let start = chunk.offset as usize;
        let end = start + chunk.len as usize;

        if end > self.data.len() {
            return Err(XystonError::codec(format!(
                "chunk {}..{} out of bounds for store of {} bytes",
                start,
                end,
                self.data.len()
            )));
        }

        Ok((start, end))
    }
}

impl PostingsAccessor for PlainSegment {
    fn codec_identifier(&self) -> &str {
        PLAIN_CODEC
    }

    fn new_decoder(&self, ctx: &TermIndexCtx) -> Result<Box<dyn PostingsDecoder>> {
        let (start, end) = self.chunk_range(&ctx.chunk)?;

        Ok(Box::new(PlainDecoder {
            data: Arc::clone(&self.data),
            pos: start,
            end,
            docs_left: ctx.documents,
            doc_id: 0,
            freq: 0,
            hits_consumed: true,
        }))
    }

    fn read_chunk(&self, chunk: &ChunkRef) -> Result<Cow<'_, [u8]>> {
        let (start, end) = self.chunk_range(chunk)?;
        Ok(Cow::Borrowed(&self.data[start..end]))
    }
}

/// Decoder over one term's `plain` postings chunk.
struct PlainDecoder {
    data: Arc<[u8]>,
    pos: usize,
    end: usize,
    /// Documents not yet consumed, current one included.
    docs_left: u32,
    doc_id: DocId,
    freq: u32,
    hits_consumed: bool,
}

impl PlainDecoder {
    fn read_u32(&mut self) -> Result<u32> {
        if self.pos + 4 > self.end {
            return Err(XystonError::codec("truncated postings chunk"));
        }

        let value = LittleEndian::read_u32(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(value)
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.end {
            return Err(XystonError::codec("truncated postings chunk"));
        }

        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_doc_header(&mut self) -> Result<()> {
        self.doc_id = self.read_u32()?;
        self.freq = self.read_u32()?;
        self.hits_consumed = false;
        Ok(())
    }

    fn skip_hits(&mut self) -> Result<()> {
        for _ in 0..self.freq {
            let _pos = self.read_u32()?;
            let len = self.read_u8()? as usize;

            if self.pos + len > self.end {
                return Err(XystonError::codec("truncated hit payload"));
            }
            self.pos += len;
        }

        self.hits_consumed = true;
        Ok(())
    }
}

impl PostingsDecoder for PlainDecoder {
    fn begin(&mut self) -> Result<()> {
        if self.docs_left == 0 {
            return Err(XystonError::codec("postings list has no documents"));
        }

        self.read_doc_header()
    }

    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn freq(&self) -> u32 {
        self.freq
    }

    fn next(&mut self) -> Result<bool> {
        if !self.hits_consumed {
            self.skip_hits()?;
        }

        self.docs_left -= 1;
        if self.docs_left == 0 {
            return Ok(false);
        }

        self.read_doc_header()?;
        Ok(true)
    }

    fn materialize_hits(&mut self, out: &mut [TermHit]) -> Result<()> {
        if self.hits_consumed {
            return Err(XystonError::codec("hits of the current document already consumed"));
        }
        if out.len() < self.freq as usize {
            return Err(XystonError::invalid_argument(
                "hit buffer smaller than the document frequency",
            ));
        }

        for slot in out.iter_mut().take(self.freq as usize) {
            let pos = self.read_u32()?;
            let len = self.read_u8()? as usize;

            if len > MAX_HIT_PAYLOAD || self.pos + len > self.end {
                return Err(XystonError::codec("truncated hit payload"));
            }

            *slot = TermHit::new(pos, &self.data[self.pos..self.pos + len]);
            self.pos += len;
        }

        self.hits_consumed = true;
        Ok(())
    }
}

/// Encoder appending `plain` term chunks to a session's output store.
pub struct PlainEncoder {
    out: Arc<RwLock<Vec<u8>>>,
    term_buf: Vec<u8>,
    documents: u32,
    last_doc_id: DocId,
    in_document: bool,
    freq_at: usize,
    hit_count: u32,
}

impl PlainEncoder {
    fn new(out: Arc<RwLock<Vec<u8>>>) -> Self {
        PlainEncoder {
            out,
            term_buf: Vec::new(),
            documents: 0,
            last_doc_id: 0,
            in_document: false,
            freq_at: 0,
            hit_count: 0,
        }
    }
}

impl PostingsEncoder for PlainEncoder {
    fn begin_term(&mut self) {
        self.term_buf.clear();
        self.documents = 0;
        self.last_doc_id = 0;
        self.in_document = false;
    }

    fn begin_document(&mut self, doc_id: DocId) -> Result<()> {
        if self.in_document {
            return Err(XystonError::index("begin_document before end_document"));
        }
        if self.documents > 0 && doc_id <= self.last_doc_id {
            return Err(XystonError::index(format!(
                "document ids must be strictly ascending: {doc_id} after {}",
                self.last_doc_id
            )));
        }

        self.term_buf.write_u32::<LittleEndian>(doc_id)?;
        // Frequency is patched in end_document once the hits are known.
        self.freq_at = self.term_buf.len();
        self.term_buf.write_u32::<LittleEndian>(0)?;

        self.last_doc_id = doc_id;
        self.in_document = true;
        self.hit_count = 0;
        Ok(())
    }

    fn new_hit(&mut self, pos: u32, payload: &[u8]) -> Result<()> {
        if !self.in_document {
            return Err(XystonError::index("new_hit outside of a document"));
        }
        if payload.len() > MAX_HIT_PAYLOAD {
            return Err(XystonError::codec(format!(
                "hit payload of {} bytes exceeds the {MAX_HIT_PAYLOAD} byte limit",
                payload.len()
            )));
        }

        self.term_buf.write_u32::<LittleEndian>(pos)?;
        self.term_buf.write_u8(payload.len() as u8)?;
        self.term_buf.extend_from_slice(payload);

        self.hit_count += 1;
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.in_document {
            return Err(XystonError::index("end_document outside of a document"));
        }

        let freq_at = self.freq_at;
        LittleEndian::write_u32(&mut self.term_buf[freq_at..freq_at + 4], self.hit_count);

        self.documents += 1;
        self.in_document = false;
        Ok(())
    }

    fn end_term(&mut self) -> Result<TermIndexCtx> {
        if self.in_document {
            return Err(XystonError::index("end_term inside of a document"));
        }

        let mut out = self.out.write();
        let offset = out.len() as u64;
        out.extend_from_slice(&self.term_buf);

        let ctx = TermIndexCtx {
            documents: self.documents,
            chunk: ChunkRef {
                offset,
                len: self.term_buf.len() as u32,
            },
        };

        self.term_buf.clear();
        self.documents = 0;
        self.last_doc_id = 0;
        Ok(ctx)
    }
}

/// An output segment being written in the `plain` codec.
#[derive(Debug, Default)]
pub struct PlainIndexSession {
    out: Arc<RwLock<Vec<u8>>>,
}

impl PlainIndexSession {
    /// Create a session with an empty output store.
    pub fn new() -> Self {
        PlainIndexSession::default()
    }

    /// Freeze the output written so far into a readable segment.
    pub fn to_segment(&self) -> PlainSegment {
        PlainSegment::from_bytes(self.out.read().clone())
    }
}

impl IndexSession for PlainIndexSession {
    fn codec_identifier(&self) -> &str {
        PLAIN_CODEC
    }

    fn new_encoder(&self) -> Box<dyn PostingsEncoder> {
        Box::new(PlainEncoder::new(Arc::clone(&self.out)))
    }

    fn append_index_chunk(
        &self,
        src: &dyn PostingsAccessor,
        ctx: &TermIndexCtx,
    ) -> Result<ChunkRef> {
        if src.codec_identifier() != PLAIN_CODEC {
            return Err(XystonError::codec(format!(
                "cannot append a {:?} chunk to a {PLAIN_CODEC:?} session",
                src.codec_identifier()
            )));
        }

        let bytes = src.read_chunk(&ctx.chunk)?;
        let mut out = self.out.write();
        let offset = out.len() as u64;
        out.extend_from_slice(&bytes);

        Ok(ChunkRef {
            offset,
            len: ctx.chunk.len,
        })
    }

    fn merge(
        &self,
        participants: Vec<MergeParticipant>,
        encoder: &mut dyn PostingsEncoder,
    ) -> Result<()> {
        merge_postings(participants, encoder)
    }

    fn bytes_written(&self) -> u64 {
        self.out.read().len() as u64
    }
}

/// Builds a `plain` segment term by term, producing the postings store and
/// its sorted term dictionary entries.
pub struct PlainSegmentWriter {
    session: PlainIndexSession,
    encoder: PlainEncoder,
    terms: Vec<TermEntry>,
}

impl PlainSegmentWriter {
    /// Create an empty segment writer.
    pub fn new() -> Self {
        let session = PlainIndexSession::new();
        let encoder = PlainEncoder::new(Arc::clone(&session.out));

        PlainSegmentWriter {
            session,
            encoder,
            terms: Vec::new(),
        }
    }

    /// Append one term with its postings. Terms must arrive in strict
    /// lexicographic ascending order; documents in ascending id order.
    pub fn add_term(&mut self, term: &[u8], postings: &[(DocId, Vec<TermHit>)]) -> Result<()> {
        if let Some((last, _)) = self.terms.last() {
            if term <= last.as_ref() {
                return Err(XystonError::index(
                    "terms must be added in strict ascending order",
                ));
            }
        }

        self.encoder.begin_term();
        for (doc_id, hits) in postings {
            self.encoder.begin_document(*doc_id)?;
            for hit in hits {
                self.encoder.new_hit(hit.pos, hit.payload())?;
            }
            self.encoder.end_document()?;
        }
        let ctx = self.encoder.end_term()?;

        self.terms.push((term.into(), ctx));
        Ok(())
    }

    /// Finish the segment, returning the postings store and the term
    /// dictionary entries in the order added.
    pub fn finish(self) -> (PlainSegment, Vec<TermEntry>) {
        (self.session.to_segment(), self.terms)
    }
}

impl Default for PlainSegmentWriter {
    fn default() -> Self {
        PlainSegmentWriter::new()
    }
}
