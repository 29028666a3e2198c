use crate::alignment::{Alignment, Hit};
use crate::block::BlockId;
use crate::graph::Graph;
use crate::io::fasta::FastaRecord;
use crate::node::Strand;

use super::MergeParams;
use super::partition::{Hunk, Segment, partition};

fn graph_of(records: &[(&str, &str)]) -> Graph {
    let records = records
        .iter()
        .map(|(name, sequence)| FastaRecord {
            name: name.to_string(),
            sequence: sequence.as_bytes().to_vec(),
        })
        .collect();
    Graph::build(records, false).unwrap()
}

fn block_of(graph: &Graph, path: &str) -> BlockId {
    let node = graph.path(path).unwrap().nodes()[0];
    graph.node(node).unwrap().block
}

fn alignment(
    qry: (&str, usize, usize, usize),
    reference: (&str, usize, usize, usize),
    strand: Strand,
    cigar: &str,
) -> Alignment {
    let (qry_name, qry_len, qry_start, qry_stop) = qry;
    let (ref_name, ref_len, ref_start, ref_stop) = reference;
    let cigar: crate::alignment::Cigar = cigar.parse().unwrap();
    let length = cigar.reference_len().max(cigar.query_len());
    Alignment {
        qry: Hit {
            name: qry_name.to_string(),
            length: qry_len,
            start: qry_start,
            stop: qry_stop,
        },
        reference: Hit {
            name: ref_name.to_string(),
            length: ref_len,
            start: ref_start,
            stop: ref_stop,
        },
        matches: length,
        length,
        quality: 60,
        strand,
        cigar,
        divergence: None,
        score: None,
    }
}

fn merge_full(graph: &mut Graph, qry: &str, reference: &str, cigar: &str, minblock: usize) {
    merge_oriented(graph, qry, reference, cigar, minblock, Strand::Forward);
}

fn merge_oriented(
    graph: &mut Graph,
    qry: &str,
    reference: &str,
    cigar: &str,
    minblock: usize,
    strand: Strand,
) {
    let qry_block = block_of(graph, qry);
    let ref_block = block_of(graph, reference);
    let qry_len = graph.block(qry_block).unwrap().len();
    let ref_len = graph.block(ref_block).unwrap().len();
    let aligned = alignment(
        (&qry_block.to_string(), qry_len, 0, qry_len),
        (&ref_block.to_string(), ref_len, 0, ref_len),
        strand,
        cigar,
    );
    let applied = graph
        .merge_alignments(&[aligned], &MergeParams { minblock }, |_| -1.0)
        .unwrap();
    assert_eq!(applied, 1);
}

#[test]
fn partition_trivial_full_length_match() {
    let aligned = alignment(("q", 8, 0, 8), ("r", 8, 0, 8), Strand::Forward, "8M");
    let segments = partition(&aligned, 500).unwrap();
    assert_eq!(
        segments,
        vec![Segment::Matched {
            qry: 0..8,
            reference: 0..8,
            interior: vec![Hunk::Aligned(8)],
        }]
    );
}

#[test]
fn partition_keeps_short_indels_local() {
    let aligned = alignment(("q", 7, 0, 7), ("r", 12, 0, 12), Strand::Forward, "4M5D3M");
    let segments = partition(&aligned, 500).unwrap();
    assert_eq!(
        segments,
        vec![Segment::Matched {
            qry: 0..7,
            reference: 0..12,
            interior: vec![Hunk::Aligned(4), Hunk::RefOnly(5), Hunk::Aligned(3)],
        }]
    );
}

#[test]
fn partition_splits_on_long_indels() {
    let aligned = alignment(
        ("q", 12, 0, 12),
        ("r", 12, 0, 12),
        Strand::Forward,
        "4M4I4D4M",
    );
    let segments = partition(&aligned, 4).unwrap();
    assert_eq!(
        segments,
        vec![
            Segment::Matched {
                qry: 0..4,
                reference: 0..4,
                interior: vec![Hunk::Aligned(4)],
            },
            Segment::QryOnly(4..8),
            Segment::RefOnly(4..8),
            Segment::Matched {
                qry: 8..12,
                reference: 8..12,
                interior: vec![Hunk::Aligned(4)],
            },
        ]
    );
}

#[test]
fn partition_promotes_leading_insertions() {
    let aligned = alignment(("q", 105, 0, 105), ("r", 100, 0, 100), Strand::Forward, "5I100M");
    let segments = partition(&aligned, 500).unwrap();
    assert_eq!(
        segments,
        vec![
            Segment::QryOnly(0..5),
            Segment::Matched {
                qry: 5..105,
                reference: 0..100,
                interior: vec![Hunk::Aligned(100)],
            },
        ]
    );
}

#[test]
fn partition_emits_unaligned_flanks() {
    let aligned = alignment(("q", 20, 5, 15), ("r", 30, 10, 20), Strand::Forward, "10M");
    let segments = partition(&aligned, 500).unwrap();
    assert_eq!(
        segments,
        vec![
            Segment::Matched {
                qry: 5..15,
                reference: 10..20,
                interior: vec![Hunk::Aligned(10)],
            },
            Segment::QryOnly(0..5),
            Segment::QryOnly(15..20),
            Segment::RefOnly(0..10),
            Segment::RefOnly(20..30),
        ]
    );
}

#[test]
fn partition_rejects_inconsistent_cigars() {
    let aligned = alignment(("q", 8, 0, 8), ("r", 8, 0, 8), Strand::Forward, "7M");
    assert!(partition(&aligned, 500).is_err());
}

#[test]
fn merge_records_a_substitution() {
    let mut graph = graph_of(&[("g1", "ACGTACGT"), ("g2", "ACGTAGGT")]);
    merge_full(&mut graph, "g2", "g1", "8M", 500);

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().unwrap();
    assert_eq!(block.consensus(), b"ACGTACGT");
    assert_eq!(block.depth(), 2);
    let g2_node = graph.path("g2").unwrap().nodes()[0];
    assert_eq!(block.substitutions_of(g2_node).unwrap().get(&5), Some(&b'G'));

    assert_eq!(graph.sequence("g1").unwrap(), b"ACGTACGT");
    assert_eq!(graph.sequence("g2").unwrap(), b"ACGTAGGT");
    graph.check().unwrap();
}

#[test]
fn merge_records_a_local_deletion() {
    let mut graph = graph_of(&[("g1", "ACGTAAAAACGT"), ("g2", "ACGTCGT")]);
    merge_full(&mut graph, "g2", "g1", "4M5D3M", 500);

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().unwrap();
    assert_eq!(block.len(), 12);
    assert_eq!(block.depth(), 2);
    let g2_node = graph.path("g2").unwrap().nodes()[0];
    assert_eq!(block.deletions_of(g2_node).unwrap().get(&4), Some(&5));

    assert_eq!(graph.sequence("g1").unwrap(), b"ACGTAAAAACGT");
    assert_eq!(graph.sequence("g2").unwrap(), b"ACGTCGT");
    graph.check().unwrap();
}

#[test]
fn merge_records_a_local_insertion() {
    let mut graph = graph_of(&[("g1", "ACGACG"), ("g2", "ACGTTTACG")]);
    merge_full(&mut graph, "g2", "g1", "3M3I3M", 500);

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().unwrap();
    assert_eq!(block.consensus(), b"ACGACG");
    assert_eq!(block.gaps().get(&3), Some(&3));
    let g2_node = graph.path("g2").unwrap().nodes()[0];
    assert_eq!(
        block.insertions_of(g2_node).unwrap().get(&(3, 0)),
        Some(&b"TTT".to_vec())
    );

    assert_eq!(graph.sequence("g1").unwrap(), b"ACGACG");
    assert_eq!(graph.sequence("g2").unwrap(), b"ACGTTTACG");
    graph.check().unwrap();
}

#[test]
fn merge_reverse_strand_flips_the_query() {
    let mut graph = graph_of(&[("g1", "ACCGGTAT"), ("g2", "ATACCGGT")]);
    merge_oriented(&mut graph, "g2", "g1", "8M", 500, Strand::Reverse);

    assert_eq!(graph.statistics().blocks, 1);
    let g2_node = graph.path("g2").unwrap().nodes()[0];
    assert_eq!(graph.node(g2_node).unwrap().strand, Strand::Reverse);
    let block = graph.blocks().next().unwrap();
    assert!(block.substitutions_of(g2_node).unwrap().is_empty());

    assert_eq!(graph.sequence("g1").unwrap(), b"ACCGGTAT");
    assert_eq!(graph.sequence("g2").unwrap(), b"ATACCGGT");
    graph.check().unwrap();
}

#[test]
fn merge_splits_on_a_long_indel() {
    let mut graph = graph_of(&[("g1", "AAAACCCCGGGG"), ("g2", "AAAATTTTGGGG")]);
    merge_full(&mut graph, "g2", "g1", "4M4I4D4M", 4);

    assert_eq!(graph.statistics().blocks, 4);
    let g1_nodes = graph.path("g1").unwrap().nodes().to_vec();
    let g2_nodes = graph.path("g2").unwrap().nodes().to_vec();
    assert_eq!(g1_nodes.len(), 3);
    assert_eq!(g2_nodes.len(), 3);
    // The two genomes share the flanking blocks and diverge in the middle.
    assert_eq!(
        graph.node(g1_nodes[0]).unwrap().block,
        graph.node(g2_nodes[0]).unwrap().block
    );
    assert_eq!(
        graph.node(g1_nodes[2]).unwrap().block,
        graph.node(g2_nodes[2]).unwrap().block
    );
    assert_ne!(
        graph.node(g1_nodes[1]).unwrap().block,
        graph.node(g2_nodes[1]).unwrap().block
    );

    assert_eq!(graph.sequence("g1").unwrap(), b"AAAACCCCGGGG");
    assert_eq!(graph.sequence("g2").unwrap(), b"AAAATTTTGGGG");
    graph.check().unwrap();
}

#[test]
fn merge_places_a_junction_insertion_against_extra_reference() {
    // g2 carries TT right where g1 has extra bases: first merge records the
    // insertion, the second re-references it against the longer reference.
    let mut graph = graph_of(&[("g1", "ACGTTACG"), ("g2", "ACGTTTTACG"), ("g3", "ACGACG")]);
    merge_full(&mut graph, "g2", "g3", "3M4I3M", 500);
    let merged = block_of(&graph, "g3");
    let merged_len = graph.block(merged).unwrap().len();
    assert_eq!(merged_len, 6);

    let target = block_of(&graph, "g1");
    let aligned = alignment(
        (&merged.to_string(), 6, 0, 6),
        (&target.to_string(), 8, 0, 8),
        Strand::Forward,
        "3M2D3M",
    );
    graph
        .merge_alignments(&[aligned], &MergeParams::default(), |_| -1.0)
        .unwrap();

    assert_eq!(graph.sequence("g1").unwrap(), b"ACGTTACG");
    assert_eq!(graph.sequence("g2").unwrap(), b"ACGTTTTACG");
    assert_eq!(graph.sequence("g3").unwrap(), b"ACGACG");
    graph.check().unwrap();
}

#[test]
fn merge_skips_rejected_stale_and_self_alignments() {
    let mut graph = graph_of(&[("g1", "ACGTACGT"), ("g2", "ACGTAGGT")]);
    let qry = block_of(&graph, "g2");
    let reference = block_of(&graph, "g1");

    let accepted = alignment(
        (&qry.to_string(), 8, 0, 8),
        (&reference.to_string(), 8, 0, 8),
        Strand::Forward,
        "8M",
    );
    let self_alignment = alignment(
        (&qry.to_string(), 8, 0, 8),
        (&qry.to_string(), 8, 0, 8),
        Strand::Forward,
        "8M",
    );
    // The same pair again: stale once the first application consumed it.
    let stale = accepted.clone();

    let applied = graph
        .merge_alignments(
            &[self_alignment, accepted, stale],
            &MergeParams::default(),
            |_| -1.0,
        )
        .unwrap();
    assert_eq!(applied, 1);

    let rejected = graph
        .merge_alignments(
            &[alignment(
                (&qry.to_string(), 8, 0, 8),
                (&reference.to_string(), 8, 0, 8),
                Strand::Forward,
                "8M",
            )],
            &MergeParams::default(),
            |_| 1.0,
        )
        .unwrap();
    assert_eq!(rejected, 0);
}
