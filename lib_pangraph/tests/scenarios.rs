//! End-to-end scenarios: build, merge, detransitive, serialize.

use anyhow::Result;

use lib_pangraph::alignment::{Alignment, Hit};
use lib_pangraph::block::BlockId;
use lib_pangraph::graph::Graph;
use lib_pangraph::io::fasta::FastaRecord;
use lib_pangraph::io::json::{read_json, write_json};
use lib_pangraph::merge::MergeParams;
use lib_pangraph::node::Strand;

fn records(entries: &[(&str, &str)]) -> Vec<FastaRecord> {
    entries
        .iter()
        .map(|(name, sequence)| FastaRecord {
            name: name.to_string(),
            sequence: sequence.as_bytes().to_vec(),
        })
        .collect()
}

fn block_at(graph: &Graph, path: &str, index: usize) -> BlockId {
    let node = graph.path(path).expect("known path").nodes()[index];
    graph.node(node).expect("registered node").block
}

fn alignment(
    graph: &Graph,
    qry: BlockId,
    qry_span: (usize, usize),
    reference: BlockId,
    ref_span: (usize, usize),
    cigar: &str,
) -> Alignment {
    Alignment {
        qry: Hit {
            name: qry.to_string(),
            length: graph.block(qry).expect("known block").len(),
            start: qry_span.0,
            stop: qry_span.1,
        },
        reference: Hit {
            name: reference.to_string(),
            length: graph.block(reference).expect("known block").len(),
            start: ref_span.0,
            stop: ref_span.1,
        },
        matches: qry_span.1 - qry_span.0,
        length: qry_span.1 - qry_span.0,
        quality: 60,
        strand: Strand::Forward,
        cigar: cigar.parse().expect("valid cigar"),
        divergence: None,
        score: None,
    }
}

fn apply(graph: &mut Graph, aligned: Alignment) -> Result<()> {
    let applied = graph.merge_alignments(&[aligned], &MergeParams { minblock: 4 }, |_| -1.0)?;
    assert_eq!(applied, 1);
    Ok(())
}

fn assert_genomes(graph: &Graph, expected: &[(&str, &str)]) -> Result<()> {
    for (name, sequence) in expected {
        assert_eq!(
            graph.sequence(name)?,
            sequence.as_bytes(),
            "genome {name} no longer materializes to its input"
        );
    }
    graph.check()?;
    Ok(())
}

#[test]
fn scenario_1_singleton_graph() -> Result<()> {
    let graph = Graph::build(records(&[("g1", "ACGTACGT")]), false)?;

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().expect("one block");
    assert_eq!(block.len(), 8);
    assert_eq!(block.depth(), 1);
    let node = graph.path("g1").expect("path").nodes()[0];
    assert!(block.substitutions_of(node).expect("node").is_empty());
    assert!(block.insertions_of(node).expect("node").is_empty());
    assert!(block.deletions_of(node).expect("node").is_empty());

    assert_genomes(&graph, &[("g1", "ACGTACGT")])
}

#[test]
fn scenario_2_trivial_merge_records_a_snp() -> Result<()> {
    let mut graph = Graph::build(records(&[("g1", "ACGTACGT"), ("g2", "ACGTAGGT")]), false)?;
    let qry = block_at(&graph, "g2", 0);
    let reference = block_at(&graph, "g1", 0);
    let aln = alignment(&graph, qry, (0, 8), reference, (0, 8), "8M");
    apply(&mut graph, aln)?;

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().expect("one block");
    assert_eq!(block.len(), 8);
    assert_eq!(block.depth(), 2);
    assert_eq!(block.consensus(), b"ACGTACGT");
    let g2_node = graph.path("g2").expect("path").nodes()[0];
    assert_eq!(
        block.substitutions_of(g2_node).expect("node").get(&5),
        Some(&b'G')
    );

    assert_genomes(&graph, &[("g1", "ACGTACGT"), ("g2", "ACGTAGGT")])
}

#[test]
fn scenario_3_short_deletion_stays_local() -> Result<()> {
    let mut graph = Graph::build(records(&[("g1", "ACGTAAAAACGT"), ("g2", "ACGTCGT")]), false)?;
    let qry = block_at(&graph, "g2", 0);
    let reference = block_at(&graph, "g1", 0);
    // The deletion is far below the default minblock, so it stays local.
    let aligned = alignment(&graph, qry, (0, 7), reference, (0, 12), "4M5D3M");
    let applied = graph.merge_alignments(&[aligned], &MergeParams::default(), |_| -1.0)?;
    assert_eq!(applied, 1);

    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().expect("one block");
    assert_eq!(block.len(), 12);
    assert_eq!(block.depth(), 2);
    let g2_node = graph.path("g2").expect("path").nodes()[0];
    assert_eq!(block.deletions_of(g2_node).expect("node").get(&4), Some(&5));

    assert_genomes(&graph, &[("g1", "ACGTAAAAACGT"), ("g2", "ACGTCGT")])
}

/// Split the two genomes on a long indel: a matched prefix and suffix with a
/// qry-only and a ref-only block in between.
fn split_graph() -> Result<Graph> {
    let mut graph = Graph::build(
        records(&[("g1", "AAAACCCCGGGG"), ("g2", "AAAATTTTGGGG")]),
        false,
    )?;
    let qry = block_at(&graph, "g2", 0);
    let reference = block_at(&graph, "g1", 0);
    let aln = alignment(&graph, qry, (0, 12), reference, (0, 12), "4M4I4D4M");
    apply(&mut graph, aln)?;
    Ok(graph)
}

#[test]
fn scenario_4_long_indel_splits_the_blocks() -> Result<()> {
    let graph = split_graph()?;

    assert_eq!(graph.statistics().blocks, 4);
    let g1_path = graph.path("g1").expect("path").nodes().to_vec();
    let g2_path = graph.path("g2").expect("path").nodes().to_vec();
    assert_eq!(g1_path.len(), 3);
    assert_eq!(g2_path.len(), 3);
    assert_eq!(block_at(&graph, "g1", 0), block_at(&graph, "g2", 0));
    assert_eq!(block_at(&graph, "g1", 2), block_at(&graph, "g2", 2));
    assert_ne!(block_at(&graph, "g1", 1), block_at(&graph, "g2", 1));

    assert_genomes(&graph, &[("g1", "AAAACCCCGGGG"), ("g2", "AAAATTTTGGGG")])
}

/// From the split graph, fold the divergent middles together and thread a
/// third genome through the same walk, so that every genome enters and
/// leaves the middle through the same flanks.
fn shared_chain_graph() -> Result<Graph> {
    let mut graph = split_graph()?;
    graph.add_genome("g3".into(), b"AAAACCCCGGGG".to_vec(), false)?;

    // Fold the qry-only middle onto the ref-only middle.
    let qry_mid = block_at(&graph, "g2", 1);
    let ref_mid = block_at(&graph, "g1", 1);
    let aln = alignment(&graph, qry_mid, (0, 4), ref_mid, (0, 4), "4M");
    apply(&mut graph, aln)?;

    // Progressively align g3 through the three shared blocks.
    for step in 0..3 {
        let qry = *graph
            .path("g3")
            .expect("path")
            .nodes()
            .last()
            .expect("non-empty path");
        let qry_block = graph.node(qry).expect("registered node").block;
        let reference = block_at(&graph, "g1", step);
        let matched = graph.block(reference).expect("known block").len();
        let aln = alignment(
            &graph,
            qry_block,
            (0, matched),
            reference,
            (0, matched),
            &format!("{matched}M"),
        );
        apply(&mut graph, aln)?;
    }
    Ok(graph)
}

#[test]
fn scenario_5_detransitive_fuses_the_shared_chain() -> Result<()> {
    let mut graph = shared_chain_graph()?;
    assert_eq!(graph.statistics().blocks, 3);
    for path in ["g1", "g2", "g3"] {
        assert_eq!(graph.path(path).expect("path").nodes().len(), 3);
    }

    let fused = graph.detransitive()?;
    assert_eq!(fused, 1);
    assert_eq!(graph.statistics().blocks, 1);
    let block = graph.blocks().next().expect("one block");
    assert_eq!(block.depth(), 3);

    // No transitive junction remains.
    assert_eq!(graph.detransitive()?, 0);

    assert_genomes(
        &graph,
        &[
            ("g1", "AAAACCCCGGGG"),
            ("g2", "AAAATTTTGGGG"),
            ("g3", "AAAACCCCGGGG"),
        ],
    )
}

#[test]
fn scenario_6_json_round_trip() -> Result<()> {
    let mut graph = shared_chain_graph()?;
    graph.detransitive()?;
    graph.finalize()?;

    let mut buffer = Vec::new();
    write_json(&graph, &mut buffer)?;
    let reloaded = read_json(&buffer[..])?;

    assert_eq!(reloaded.statistics(), graph.statistics());
    assert_genomes(
        &reloaded,
        &[
            ("g1", "AAAACCCCGGGG"),
            ("g2", "AAAATTTTGGGG"),
            ("g3", "AAAACCCCGGGG"),
        ],
    )
}

#[test]
fn reconsensus_shifts_the_consensus_to_the_majority() -> Result<()> {
    // Two genomes agree against the original reference; at depth three the
    // consensus moves to the majority base and the reference becomes the
    // variant carrier.
    let mut graph = Graph::build(
        records(&[("g1", "ACGTACGT"), ("g2", "ACGTAGGT"), ("g3", "ACGTAGGT")]),
        false,
    )?;
    let first = block_at(&graph, "g2", 0);
    let reference = block_at(&graph, "g1", 0);
    let aln = alignment(&graph, first, (0, 8), reference, (0, 8), "8M");
    apply(&mut graph, aln)?;
    let second = block_at(&graph, "g3", 0);
    let reference = block_at(&graph, "g1", 0);
    let aln = alignment(&graph, second, (0, 8), reference, (0, 8), "8M");
    apply(&mut graph, aln)?;

    let block = graph.blocks().next().expect("one block");
    assert_eq!(block.consensus(), b"ACGTAGGT");
    let g1_node = graph.path("g1").expect("path").nodes()[0];
    assert_eq!(
        block.substitutions_of(g1_node).expect("node").get(&5),
        Some(&b'C')
    );

    assert_genomes(
        &graph,
        &[("g1", "ACGTACGT"), ("g2", "ACGTAGGT"), ("g3", "ACGTAGGT")],
    )
}
