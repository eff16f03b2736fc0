//! End-to-end merge scenarios over in-memory segments.

use std::sync::Arc;

use xyston::codec::plain::PlainSegmentWriter;
use xyston::codec::traits::{IndexSession, PostingsAccessor, PostingsDecoder};
use xyston::codec::types::{DocId, TermHit};
use xyston::codec::vint::{VIntIndexSession, VIntSegmentWriter};
use xyston::masked::MaskedDocuments;
use xyston::merge::{MergeCandidate, MergeCandidatesCollection, MergeConfig};
use xyston::terms::{TermEntry, VecTermIterator};

fn hit(pos: u32, payload: &[u8]) -> TermHit {
    TermHit::new(pos, payload)
}

fn mask(ids: &[DocId]) -> Arc<MaskedDocuments> {
    Arc::new(ids.iter().copied().collect())
}

/// Decode every term of a merged segment back into (term, postings) form.
fn decode_all(
    accessor: &dyn PostingsAccessor,
    terms: &[TermEntry],
) -> Vec<(Vec<u8>, Vec<(DocId, Vec<TermHit>)>)> {
    let mut result = Vec::new();

    for (term, ctx) in terms {
        let mut postings = Vec::new();
        let mut decoder = accessor.new_decoder(ctx).unwrap();
        decoder.begin().unwrap();

        loop {
            let doc_id = decoder.doc_id();
            let freq = decoder.freq() as usize;
            let mut hits = vec![TermHit::default(); freq];
            decoder.materialize_hits(&mut hits).unwrap();
            postings.push((doc_id, hits));

            if !decoder.next().unwrap() {
                break;
            }
        }

        result.push((term.to_vec(), postings));
    }

    result
}

fn vint_candidate(
    generation: u64,
    terms: &[(&str, Vec<(DocId, Vec<TermHit>)>)],
    masked: Option<Arc<MaskedDocuments>>,
) -> MergeCandidate {
    let mut writer = VIntSegmentWriter::new();
    for (term, postings) in terms {
        writer.add_term(term.as_bytes(), postings).unwrap();
    }
    let (segment, entries) = writer.finish();

    MergeCandidate {
        generation,
        terms: Some(Box::new(VecTermIterator::new(entries))),
        accessor: Some(Arc::new(segment)),
        masked_documents: masked,
    }
}

fn plain_candidate(
    generation: u64,
    terms: &[(&str, Vec<(DocId, Vec<TermHit>)>)],
    masked: Option<Arc<MaskedDocuments>>,
) -> MergeCandidate {
    let mut writer = PlainSegmentWriter::new();
    for (term, postings) in terms {
        writer.add_term(term.as_bytes(), postings).unwrap();
    }
    let (segment, entries) = writer.finish();

    MergeCandidate {
        generation,
        terms: Some(Box::new(VecTermIterator::new(entries))),
        accessor: Some(Arc::new(segment)),
        masked_documents: masked,
    }
}

fn run_merge(collection: &mut MergeCandidatesCollection) -> (VIntIndexSession, Vec<TermEntry>) {
    collection.commit();

    let session = VIntIndexSession::new();
    let mut terms = Vec::new();
    collection
        .merge(&session, &mut terms, &MergeConfig::default())
        .unwrap();

    (session, terms)
}

#[test]
fn test_duplicate_documents_newest_generation_wins() {
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(vint_candidate(
        2,
        &[(
            "apple",
            vec![(10, vec![hit(7, b"new")]), (20, vec![hit(1, b"")])],
        )],
        None,
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[(
            "apple",
            vec![(10, vec![hit(3, b"old")]), (30, vec![hit(2, b"")])],
        )],
        None,
    ));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].0, b"apple");

    let postings = &decoded[0].1;
    let doc_ids: Vec<DocId> = postings.iter().map(|(d, _)| *d).collect();
    assert_eq!(doc_ids, vec![10, 20, 30]);

    // Document 10 carries generation 2's hits, not generation 1's.
    assert_eq!(postings[0].1, vec![hit(7, b"new")]);
}

#[test]
fn test_a_generations_own_mask_never_applies_to_itself() {
    // Generation 2 masks document 20, which only generation 2 itself
    // contains. Masks suppress strictly older generations only, so 20
    // survives.
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(vint_candidate(
        2,
        &[(
            "apple",
            vec![(10, vec![hit(7, b"")]), (20, vec![hit(1, b"")])],
        )],
        Some(mask(&[20])),
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[(
            "apple",
            vec![(10, vec![hit(3, b"")]), (30, vec![hit(2, b"")])],
        )],
        None,
    ));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    let doc_ids: Vec<DocId> = decoded[0].1.iter().map(|(d, _)| *d).collect();
    assert_eq!(doc_ids, vec![10, 20, 30]);
}

#[test]
fn test_newer_mask_suppresses_older_postings() {
    // A newer mask-only generation deletes documents 10 and 30; both lived
    // in older generations, so neither survives. Document 20 remains.
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::mask_only(3, mask(&[10, 30])));
    collection.add_candidate(vint_candidate(
        2,
        &[(
            "apple",
            vec![(10, vec![hit(7, b"")]), (20, vec![hit(1, b"")])],
        )],
        None,
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[("apple", vec![(30, vec![hit(2, b"")])])],
        None,
    ));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    let doc_ids: Vec<DocId> = decoded[0].1.iter().map(|(d, _)| *d).collect();
    assert_eq!(doc_ids, vec![20]);
}

#[test]
fn test_term_vanishes_when_every_document_is_masked() {
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::mask_only(2, mask(&[5, 6])));
    collection.add_candidate(vint_candidate(
        1,
        &[
            ("doomed", vec![(5, vec![hit(1, b"")]), (6, vec![hit(2, b"")])]),
            ("kept", vec![(7, vec![hit(3, b"")])]),
        ],
        None,
    ));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].0, b"kept");
}

#[test]
fn test_mixed_codec_merge() {
    // Three generations share term "x" with overlapping documents and
    // different codecs, forcing the decode/re-encode path.
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(vint_candidate(
        3,
        &[("x", vec![(5, vec![hit(50, b"g3")])])],
        None,
    ));
    collection.add_candidate(plain_candidate(
        2,
        &[("x", vec![(5, vec![hit(20, b"g2")]), (7, vec![hit(21, b"g2")])])],
        None,
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[("x", vec![(7, vec![hit(10, b"g1")]), (9, vec![hit(11, b"g1")])])],
        None,
    ));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    assert_eq!(decoded.len(), 1);
    let postings = &decoded[0].1;
    let doc_ids: Vec<DocId> = postings.iter().map(|(d, _)| *d).collect();
    assert_eq!(doc_ids, vec![5, 7, 9]);

    // Document 5 from generation 3, document 7 from generation 2.
    assert_eq!(postings[0].1, vec![hit(50, b"g3")]);
    assert_eq!(postings[1].1, vec![hit(21, b"g2")]);
    assert_eq!(postings[2].1, vec![hit(11, b"g1")]);
}

#[test]
fn test_fast_path_copies_chunks_byte_for_byte() {
    let mut writer = VIntSegmentWriter::new();
    writer
        .add_term(
            b"solo",
            &[(4, vec![hit(1, b"pq"), hit(9, b"")]), (11, vec![hit(2, b"")])],
        )
        .unwrap();
    let (segment, entries) = writer.finish();
    let source_ctx = entries[0].1;
    let source_bytes = segment.read_chunk(&source_ctx.chunk).unwrap().into_owned();

    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::new(
        1,
        Box::new(VecTermIterator::new(entries)),
        Arc::new(segment),
        None,
    ));

    let (session, terms) = run_merge(&mut collection);

    assert_eq!(terms.len(), 1);
    let merged_ctx = terms[0].1;
    assert_eq!(merged_ctx.documents, source_ctx.documents);

    let merged = session.to_segment();
    assert_eq!(
        merged.read_chunk(&merged_ctx.chunk).unwrap().into_owned(),
        source_bytes
    );
}

#[test]
fn test_single_candidate_with_overlay_is_reencoded() {
    // A newer mask forces the lone candidate off the byte-copy path.
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::mask_only(5, mask(&[2])));
    collection.add_candidate(vint_candidate(
        4,
        &[("w", vec![(1, vec![hit(1, b"")]), (2, vec![hit(2, b"")]), (3, vec![hit(3, b"")])])],
        None,
    ));

    collection.commit();

    let session = VIntIndexSession::new();
    let mut terms = Vec::new();
    let stats = collection
        .merge(&session, &mut terms, &MergeConfig::default())
        .unwrap();

    assert_eq!(stats.chunks_appended, 0);
    assert_eq!(stats.terms_reencoded, 1);
    assert_eq!(stats.docs_masked, 1);

    let decoded = decode_all(&session.to_segment(), &terms);
    let doc_ids: Vec<DocId> = decoded[0].1.iter().map(|(d, _)| *d).collect();
    assert_eq!(doc_ids, vec![1, 3]);
}

#[test]
fn test_interleaved_dictionaries_merge_in_lexicographic_order() {
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(vint_candidate(
        2,
        &[
            ("bravo", vec![(1, vec![hit(1, b"")])]),
            ("delta", vec![(1, vec![hit(1, b"")])]),
        ],
        None,
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[
            ("alpha", vec![(2, vec![hit(1, b"")])]),
            ("charlie", vec![(2, vec![hit(1, b"")])]),
            ("delta", vec![(2, vec![hit(1, b"")])]),
        ],
        None,
    ));

    let (_, terms) = run_merge(&mut collection);

    let emitted: Vec<&[u8]> = terms.iter().map(|(t, _)| t.as_ref()).collect();
    assert_eq!(
        emitted,
        vec![b"alpha" as &[u8], b"bravo", b"charlie", b"delta"]
    );
}

#[test]
fn test_flush_hint_is_harmless() {
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(vint_candidate(
        1,
        &[
            ("a", vec![(1, vec![hit(1, b"")])]),
            ("b", vec![(2, vec![hit(2, b"")])]),
        ],
        None,
    ));
    collection.commit();

    let session = VIntIndexSession::new();
    let mut terms = Vec::new();
    let config = MergeConfig {
        flush_every_bytes: 1,
        ..Default::default()
    };

    let stats = collection.merge(&session, &mut terms, &config).unwrap();
    assert_eq!(stats.terms_emitted, 2);
}

#[test]
fn test_layered_generations_hold_all_ordering_invariants() {
    // Three overlapping generations plus one newer mask-only overlay; checks
    // lexicographic term order, strictly ascending unique doc ids, mask
    // respect, and newest-wins across every emitted term.
    let terms_g3: Vec<(&str, Vec<(DocId, Vec<TermHit>)>)> = vec![
        ("ant", vec![(2, vec![hit(30, b"g3")]), (8, vec![hit(31, b"g3")])]),
        ("bee", vec![(4, vec![hit(32, b"g3")])]),
    ];
    let terms_g2: Vec<(&str, Vec<(DocId, Vec<TermHit>)>)> = vec![
        ("ant", vec![(2, vec![hit(20, b"g2")]), (6, vec![hit(21, b"g2")])]),
        ("cat", vec![(5, vec![hit(22, b"g2")]), (9, vec![hit(23, b"g2")])]),
    ];
    let terms_g1: Vec<(&str, Vec<(DocId, Vec<TermHit>)>)> = vec![
        ("ant", vec![(6, vec![hit(10, b"g1")]), (7, vec![hit(11, b"g1")])]),
        ("bee", vec![(4, vec![hit(12, b"g1")]), (9, vec![hit(13, b"g1")])]),
        ("cat", vec![(3, vec![hit(14, b"g1")])]),
    ];

    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::mask_only(4, mask(&[9])));
    collection.add_candidate(vint_candidate(3, &terms_g3, Some(mask(&[7]))));
    collection.add_candidate(vint_candidate(2, &terms_g2, Some(mask(&[3]))));
    collection.add_candidate(vint_candidate(1, &terms_g1, None));

    let (session, terms) = run_merge(&mut collection);
    let decoded = decode_all(&session.to_segment(), &terms);

    // Lexicographic term order
    let emitted: Vec<&[u8]> = decoded.iter().map(|(t, _)| t.as_slice()).collect();
    assert_eq!(emitted, vec![b"ant" as &[u8], b"bee", b"cat"]);

    for (_, postings) in &decoded {
        // Strictly ascending, unique doc ids
        for pair in postings.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    // ant: 2 and 8 from g3 (newest-wins on 2), 6 from g2 (g2 beats g1),
    // 7 masked by g3's overlay.
    assert_eq!(
        decoded[0].1,
        vec![
            (2, vec![hit(30, b"g3")]),
            (6, vec![hit(21, b"g2")]),
            (8, vec![hit(31, b"g3")]),
        ]
    );

    // bee: 4 from g3 (newest-wins), 9 from g1 masked by the gen-4 overlay.
    assert_eq!(decoded[1].1, vec![(4, vec![hit(32, b"g3")])]);

    // cat: 5 from g2, 9 from g2 masked by the gen-4 overlay, 3 from g1
    // masked by g2's mask.
    assert_eq!(decoded[2].1, vec![(5, vec![hit(22, b"g2")])]);
}

#[test]
fn test_mask_only_candidate_contributes_no_terms() {
    let mut collection = MergeCandidatesCollection::new();
    collection.add_candidate(MergeCandidate::mask_only(2, mask(&[99])));
    collection.add_candidate(vint_candidate(
        1,
        &[("only", vec![(1, vec![hit(1, b"")])])],
        None,
    ));

    let (_, terms) = run_merge(&mut collection);

    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0].0.as_ref(), b"only");
}

#[test]
fn test_merge_stats_account_for_every_path() {
    let mut collection = MergeCandidatesCollection::new();
    // "shared" goes through the bulk merge, "lonely" through the chunk copy.
    collection.add_candidate(vint_candidate(
        2,
        &[("shared", vec![(1, vec![hit(1, b"")])])],
        None,
    ));
    collection.add_candidate(vint_candidate(
        1,
        &[
            ("lonely", vec![(5, vec![hit(2, b"")])]),
            ("shared", vec![(2, vec![hit(3, b"")])]),
        ],
        None,
    ));

    collection.commit();

    let session = VIntIndexSession::new();
    let mut terms = Vec::new();
    let stats = collection
        .merge(&session, &mut terms, &MergeConfig::default())
        .unwrap();

    assert_eq!(stats.terms_emitted, 2);
    assert_eq!(stats.chunks_appended, 1);
    assert_eq!(stats.bulk_merges, 1);
    assert_eq!(stats.docs_emitted, 3);
    assert_eq!(stats.bytes_written, session.bytes_written());
}
