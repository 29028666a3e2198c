//! GFA 1.0 export.

use std::collections::BTreeSet;
use std::io::Write;

use crate::block::BlockId;
use crate::error::Result;
use crate::graph::Graph;
use crate::node::Strand;

type Link = (BlockId, Strand, BlockId, Strand);

fn canonical_link(link: Link) -> Link {
    let (left, left_strand, right, right_strand) = link;
    let mirror = (right, right_strand.flip(), left, left_strand.flip());
    link.min(mirror)
}

/// Write the graph as GFA 1.0: one segment per block (consensus plus an
/// `RC` depth tag), links deduplicated over both traversal directions, and
/// one path line per genome.
pub fn write_gfa(graph: &Graph, mut writer: impl Write) -> Result<()> {
    writeln!(writer, "H\tVN:Z:1.0")?;

    for id in graph.block_ids() {
        let block = graph.block(id).expect("listed id");
        writeln!(
            writer,
            "S\t{id}\t{}\tRC:i:{}",
            String::from_utf8_lossy(block.consensus()),
            block.depth()
        )?;
    }

    let mut links: BTreeSet<Link> = BTreeSet::new();
    for path in graph.paths() {
        let nodes = path.nodes();
        let pair_count = if path.circular() && nodes.len() > 1 {
            nodes.len()
        } else {
            nodes.len().saturating_sub(1)
        };
        for index in 0..pair_count {
            let left = graph.node(nodes[index]).expect("registered node");
            let right = graph
                .node(nodes[(index + 1) % nodes.len()])
                .expect("registered node");
            links.insert(canonical_link((
                left.block,
                left.strand,
                right.block,
                right.strand,
            )));
        }
    }
    for (left, left_strand, right, right_strand) in links {
        writeln!(writer, "L\t{left}\t{left_strand}\t{right}\t{right_strand}\t0M")?;
    }

    for path in graph.paths() {
        let walk: Vec<String> = path
            .nodes()
            .iter()
            .map(|&node_id| {
                let node = graph.node(node_id).expect("registered node");
                format!("{}{}", node.block, node.strand)
            })
            .collect();
        write!(writer, "P\t{}\t{}\t*", path.name(), walk.join(","))?;
        if path.circular() {
            write!(writer, "\tTP:Z:circular")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}
