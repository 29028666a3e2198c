//! Pairwise merge: integrate an external alignment between two block
//! consensi into the graph.
//!
//! The alignment is partitioned into segments, every matched segment is
//! fused onto the reference consensus by re-referencing the query's alleles,
//! and both blocks' nodes are rewritten so that each path traverses the new
//! blocks in place of the old ones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use log::{debug, trace, warn};

use crate::alignment::Alignment;
use crate::block::{Block, BlockId, Deletions, Insertions};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeId};

mod partition;

#[cfg(test)]
mod tests;

use partition::{Hunk, Segment, partition};

#[derive(Debug, Clone)]
pub struct MergeParams {
    /// Indels at least this long split a matched segment into separate
    /// blocks instead of staying local.
    pub minblock: usize,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self { minblock: 500 }
    }
}

impl Graph {
    /// Integrate a batch of alignments. `energy` scores each alignment;
    /// only non-positive scores are consumed. Alignments whose blocks were
    /// already consumed earlier in the batch are skipped; the guide-tree
    /// driver re-aligns on its next round. Returns the number of alignments
    /// applied.
    pub fn merge_alignments(
        &mut self,
        alignments: &[Alignment],
        params: &MergeParams,
        energy: impl Fn(&Alignment) -> f64,
    ) -> Result<usize> {
        let mut applied = 0;
        for alignment in alignments {
            let score = energy(alignment);
            if score > 0.0 {
                debug!(
                    "rejecting alignment {} ~ {} with energy {score}",
                    alignment.qry.name, alignment.reference.name
                );
                continue;
            }
            let (Ok(qry_id), Ok(ref_id)) = (
                alignment.qry.name.parse::<BlockId>(),
                alignment.reference.name.parse::<BlockId>(),
            ) else {
                return Err(Error::UnknownBlock(format!(
                    "{} ~ {}",
                    alignment.qry.name, alignment.reference.name
                )));
            };
            if qry_id == ref_id {
                warn!("skipping self-alignment of block {qry_id}");
                continue;
            }
            if !self.blocks.contains_key(&qry_id) || !self.blocks.contains_key(&ref_id) {
                debug!(
                    "skipping stale alignment {} ~ {}",
                    alignment.qry.name, alignment.reference.name
                );
                continue;
            }
            self.merge_one(alignment, qry_id, ref_id, params)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn merge_one(
        &mut self,
        alignment: &Alignment,
        qry_id: BlockId,
        ref_id: BlockId,
        params: &MergeParams,
    ) -> Result<()> {
        let mut qry_block = self.blocks.remove(&qry_id).expect("presence checked");
        let ref_block = self.blocks.remove(&ref_id).expect("presence checked");

        if alignment.qry.length != qry_block.len()
            || alignment.reference.length != ref_block.len()
            || qry_block.is_empty()
            || ref_block.is_empty()
        {
            // Reinstate before failing so the graph stays consistent.
            self.blocks.insert(qry_id, qry_block);
            self.blocks.insert(ref_id, ref_block);
            return Err(Error::MalformedAlignment {
                qry: alignment.qry.name.clone(),
                reference: alignment.reference.name.clone(),
                detail: "hit lengths disagree with the block consensi".into(),
            });
        }

        let mut oriented = alignment.clone();
        if oriented.strand.is_reverse() {
            let length = qry_block.len();
            oriented.qry.start = length - alignment.qry.stop;
            oriented.qry.stop = length - alignment.qry.start;
            oriented.strand = crate::node::Strand::Forward;
            for node in qry_block.node_ids() {
                let entry = self.nodes.get_mut(&node).expect("node registered");
                entry.strand = entry.strand.flip();
            }
            qry_block = qry_block.reverse_complement();
        }

        let segments = partition(&oriented, params.minblock)?;
        trace!(
            "merging {qry_id} into {ref_id} across {} segments",
            segments.len()
        );

        let qry_nodes = qry_block.node_ids();
        let ref_nodes = ref_block.node_ids();
        let mut qry_pieces: HashMap<NodeId, Vec<(usize, NodeId)>> = HashMap::new();
        let mut ref_pieces: HashMap<NodeId, Vec<(usize, NodeId)>> = HashMap::new();

        for segment in &segments {
            let mut block = match segment {
                Segment::QryOnly(range) => qry_block.slice(range.clone()),
                Segment::RefOnly(range) => ref_block.slice(range.clone()),
                Segment::Matched {
                    qry,
                    reference,
                    interior,
                } => fuse(&qry_block, &ref_block, qry.clone(), reference.clone(), interior)?,
            };

            let mut mapping = HashMap::new();
            if let Some(range) = segment.qry_range() {
                for &old in &qry_nodes {
                    let fresh = NodeId::random();
                    mapping.insert(old, fresh);
                    qry_pieces.entry(old).or_default().push((range.start, fresh));
                }
            }
            if let Some(range) = segment.ref_range() {
                for &old in &ref_nodes {
                    let fresh = NodeId::random();
                    mapping.insert(old, fresh);
                    ref_pieces.entry(old).or_default().push((range.start, fresh));
                }
            }
            block.rekey(&mapping);
            for (&old, &fresh) in &mapping {
                let strand = self.nodes[&old].strand;
                self.nodes.insert(fresh, Node::new(block.id(), strand));
            }
            self.blocks.insert(block.id(), block);
        }

        let mut replacements: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (old, mut pieces) in qry_pieces.into_iter().chain(ref_pieces) {
            pieces.sort_by_key(|&(start, _)| start);
            if self.nodes[&old].strand.is_reverse() {
                pieces.reverse();
            }
            replacements.insert(old, pieces.into_iter().map(|(_, fresh)| fresh).collect());
        }
        for path in self.paths.values_mut() {
            path.splice_nodes(&replacements);
        }
        for old in replacements.keys() {
            self.nodes.remove(old);
        }
        Ok(())
    }
}

/// Fuse one matched segment: the output block keeps the reference slice's
/// consensus and alleles, and gains every query node's alleles re-referenced
/// through the segment's interior correspondence.
fn fuse(
    qry_block: &Block,
    ref_block: &Block,
    qry_range: Range<usize>,
    ref_range: Range<usize>,
    interior: &[Hunk],
) -> Result<Block> {
    let q = qry_block.slice(qry_range);
    let r = ref_block.slice(ref_range);
    let qry_nodes = q.node_ids();
    let qry_len = q.len();

    let (_, consensus, mut gaps, mut substitutions, mut insertions, mut deletions) =
        r.into_parts();
    for &node in &qry_nodes {
        substitutions.entry(node).or_default();
        insertions.entry(node).or_default();
        deletions.entry(node).or_default();
    }

    // Query insertion keys already emitted somewhere; never emitted twice.
    let mut consumed: HashSet<(NodeId, usize, usize)> = HashSet::new();
    let mut x_q = 0;
    let mut x_r = 0;

    for hunk in interior {
        match *hunk {
            Hunk::Aligned(count) => {
                let owns_end = x_q + count == qry_len;
                for &node in &qry_nodes {
                    let node_subs = q.substitutions_of(node).expect("shared node set");
                    let node_dels = q.deletions_of(node).expect("shared node set");
                    let out_subs = substitutions.get_mut(&node).expect("entered above");

                    for (&at, &base) in node_subs.range(x_q..x_q + count) {
                        let mapped = at - x_q + x_r;
                        if base != consensus[mapped] {
                            out_subs.insert(mapped, base);
                        }
                    }
                    // Where the consensi disagree, an unedited query base is
                    // a substitution against the reference consensus.
                    for at in x_q..x_q + count {
                        let mapped = at - x_q + x_r;
                        if q.consensus()[at] == consensus[mapped]
                            || node_subs.contains_key(&at)
                            || covered_by_deletion(node_dels, at)
                        {
                            continue;
                        }
                        out_subs.insert(mapped, q.consensus()[at]);
                    }

                    let out_dels = deletions.get_mut(&node).expect("entered above");
                    for (&at, &length) in node_dels {
                        let clipped_start = at.max(x_q);
                        let clipped_end = (at + length).min(x_q + count);
                        if clipped_start < clipped_end {
                            out_dels.insert(
                                clipped_start - x_q + x_r,
                                clipped_end - clipped_start,
                            );
                        }
                    }

                    let carried: Vec<((usize, usize), Vec<u8>)> = q
                        .insertions_of(node)
                        .expect("shared node set")
                        .iter()
                        .filter(|&(&(anchor, offset), _)| {
                            let owned = anchor >= x_q
                                && (anchor < x_q + count || (owns_end && anchor == x_q + count));
                            owned && !consumed.contains(&(node, anchor, offset))
                        })
                        .map(|(&key, sequence)| (key, sequence.clone()))
                        .collect();
                    for ((anchor, offset), sequence) in carried {
                        consumed.insert((node, anchor, offset));
                        let out_anchor = anchor - x_q + x_r;
                        let reserved = q.gaps().get(&anchor).copied().unwrap_or(0);
                        add_insertion(
                            insertions.get_mut(&node).expect("entered above"),
                            &mut gaps,
                            out_anchor,
                            offset,
                            sequence,
                        );
                        let gap = gaps.get_mut(&out_anchor).expect("just reserved");
                        *gap = (*gap).max(reserved);
                    }
                }
                x_q += count;
                x_r += count;
            }
            Hunk::RefOnly(count) => {
                for &node in &qry_nodes {
                    let pending: Vec<((usize, usize), Vec<u8>)> = q
                        .insertions_of(node)
                        .expect("shared node set")
                        .range((x_q, 0)..=(x_q, usize::MAX))
                        .filter(|&(&(anchor, offset), _)| {
                            !consumed.contains(&(node, anchor, offset))
                        })
                        .map(|(&key, sequence)| (key, sequence.clone()))
                        .collect();

                    if pending.is_empty() {
                        deletions
                            .get_mut(&node)
                            .expect("entered above")
                            .insert(x_r, count);
                        continue;
                    }

                    // The query carried an insertion right where the
                    // reference has extra bases: place it against them.
                    let bytes: Vec<u8> = pending
                        .iter()
                        .flat_map(|(_, sequence)| sequence.iter().copied())
                        .collect();
                    for ((anchor, offset), _) in &pending {
                        consumed.insert((node, *anchor, *offset));
                    }
                    let window = &consensus[x_r..x_r + count];
                    let out_subs = substitutions.get_mut(&node).expect("entered above");
                    if bytes.len() <= window.len() {
                        let delta = hamming_offset(&bytes, window);
                        for (index, &byte) in bytes.iter().enumerate() {
                            if byte != window[delta + index] {
                                out_subs.insert(x_r + delta + index, byte);
                            }
                        }
                        let out_dels = deletions.get_mut(&node).expect("entered above");
                        if delta > 0 {
                            out_dels.insert(x_r, delta);
                        }
                        if delta + bytes.len() < count {
                            out_dels
                                .insert(x_r + delta + bytes.len(), count - delta - bytes.len());
                        }
                    } else {
                        for (index, &window_byte) in window.iter().enumerate() {
                            if bytes[index] != window_byte {
                                out_subs.insert(x_r + index, bytes[index]);
                            }
                        }
                        let overhang = bytes[count..].to_vec();
                        add_insertion(
                            insertions.get_mut(&node).expect("entered above"),
                            &mut gaps,
                            x_r + count,
                            0,
                            overhang,
                        );
                    }
                }
                x_r += count;
            }
            Hunk::QryOnly(count) => {
                for &node in &qry_nodes {
                    let bytes = node_bytes_in_range(
                        &q,
                        node,
                        x_q..x_q + count,
                        x_q + count == qry_len,
                        &mut consumed,
                    );
                    if bytes.is_empty() {
                        continue;
                    }
                    add_insertion(
                        insertions.get_mut(&node).expect("entered above"),
                        &mut gaps,
                        x_r,
                        0,
                        bytes,
                    );
                }
                x_q += count;
            }
        }
    }

    let mut fused = Block::from_parts(
        BlockId::random(),
        consensus,
        gaps,
        substitutions,
        insertions,
        deletions,
    );
    fused.reconsensus()?;
    Ok(fused)
}

/// The node's actual bytes over `range` of the query slice: consensus with
/// the local substitutions, deletions and owned insertions applied.
fn node_bytes_in_range(
    q: &Block,
    node: NodeId,
    range: Range<usize>,
    owns_end: bool,
    consumed: &mut HashSet<(NodeId, usize, usize)>,
) -> Vec<u8> {
    enum Local {
        Insertion(Vec<u8>),
        Deletion(usize),
        Substitution(u8),
    }

    let mut edits: Vec<(usize, u8, usize, Local)> = Vec::new();
    for (&at, &base) in q
        .substitutions_of(node)
        .expect("shared node set")
        .range(range.clone())
    {
        edits.push((at, 1, 0, Local::Substitution(base)));
    }
    for (&at, &length) in q.deletions_of(node).expect("shared node set") {
        let clipped_start = at.max(range.start);
        let clipped_end = (at + length).min(range.end);
        if clipped_start < clipped_end {
            edits.push((clipped_start, 1, 0, Local::Deletion(clipped_end - clipped_start)));
        }
    }
    let owned_insertions: Vec<((usize, usize), Vec<u8>)> = q
        .insertions_of(node)
        .expect("shared node set")
        .iter()
        .filter(|&(&(anchor, offset), _)| {
            let owned = anchor >= range.start
                && (anchor < range.end || (owns_end && anchor == range.end));
            owned && !consumed.contains(&(node, anchor, offset))
        })
        .map(|(&key, sequence)| (key, sequence.clone()))
        .collect();
    for ((anchor, offset), sequence) in owned_insertions {
        consumed.insert((node, anchor, offset));
        edits.push((anchor, 0, offset, Local::Insertion(sequence)));
    }
    edits.sort_by_key(|&(at, rank, offset, _)| (at, rank, offset));

    let mut output = Vec::new();
    let mut read = range.start;
    for (at, _, _, edit) in edits {
        match edit {
            Local::Insertion(sequence) => {
                if at > read {
                    output.extend_from_slice(&q.consensus()[read..at]);
                    read = at;
                }
                output.extend_from_slice(&sequence);
            }
            Local::Deletion(length) => {
                if at > read {
                    output.extend_from_slice(&q.consensus()[read..at]);
                }
                read = read.max(at + length);
            }
            Local::Substitution(base) => {
                if at >= read {
                    output.extend_from_slice(&q.consensus()[read..at]);
                    output.push(base);
                    read = at + 1;
                }
            }
        }
    }
    output.extend_from_slice(&q.consensus()[read..range.end]);
    output
}

/// Record an insertion at `anchor`, shifting it right past any content the
/// node already carries there and widening the gap to the new reach.
fn add_insertion(
    insertions: &mut Insertions,
    gaps: &mut BTreeMap<usize, usize>,
    anchor: usize,
    desired_offset: usize,
    bytes: Vec<u8>,
) {
    if bytes.is_empty() {
        return;
    }
    let reach = insertions
        .range((anchor, 0)..=(anchor, usize::MAX))
        .map(|(&(_, offset), sequence)| offset + sequence.len())
        .max()
        .unwrap_or(0);
    let offset = desired_offset.max(reach);
    let gap = gaps.entry(anchor).or_default();
    *gap = (*gap).max(offset + bytes.len());
    insertions.insert((anchor, offset), bytes);
}

fn covered_by_deletion(deletions: &Deletions, position: usize) -> bool {
    deletions
        .range(..=position)
        .next_back()
        .is_some_and(|(&at, &length)| at + length > position)
}

/// The left-most minimal-mismatch placement of `bytes` inside `window`.
fn hamming_offset(bytes: &[u8], window: &[u8]) -> usize {
    let mut best_offset = 0;
    let mut best_mismatches = usize::MAX;
    for offset in 0..=window.len() - bytes.len() {
        let mismatches = bytes
            .iter()
            .zip(&window[offset..])
            .filter(|(byte, window_byte)| byte != window_byte)
            .count();
        if mismatches < best_mismatches {
            best_mismatches = mismatches;
            best_offset = offset;
        }
    }
    best_offset
}
