//! Column-wise consensus recomputation.

use std::collections::{BTreeMap, HashMap};

use log::trace;

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::sequence::GAP;

use super::{Block, Deletions, Insertions, Substitutions};

/// What one alignment column is in the new consensus.
#[derive(Debug, Clone, Copy)]
enum Column {
    /// A consensus base, with its position in the de-gapped sequence.
    Base(usize),
    /// A gap column: the anchor it belongs to and the first column of its run.
    Gap { anchor: usize, run_start: usize },
}

impl Block {
    /// Recompute the consensus as the column-wise plurality over all nodes.
    ///
    /// Runs only at depth >= 3; at lower depth the vote cannot outweigh the
    /// stored consensus. Ties keep the stored consensus byte. Returns without
    /// touching the block when the vote already equals the stored row.
    pub fn reconsensus(&mut self) -> Result<()> {
        if self.depth() < 3 {
            return Ok(());
        }

        let nodes = self.node_ids();
        let mut rows = Vec::with_capacity(nodes.len());
        for &node in &nodes {
            rows.push((node, self.aligned_row(node)?));
        }
        let stored = self.consensus_row();
        let modal = modal_row(&rows, Some(&stored));

        if modal == stored {
            trace!("block {}: consensus already the column plurality", self.id);
            return Ok(());
        }
        self.apply_matrix(&rows, &modal)
    }

    /// Rebuild consensus, gaps and every allele map from externally aligned
    /// rows (one per node, equal width). Used by the polish step; the block
    /// keeps its identity and node set.
    pub(crate) fn rebuild_from_rows(&mut self, rows: &[(NodeId, Vec<u8>)]) -> Result<()> {
        let mut expected = self.node_ids();
        let mut provided: Vec<_> = rows.iter().map(|(node, _)| *node).collect();
        expected.sort_unstable();
        provided.sort_unstable();
        if expected != provided {
            return Err(Error::Invariant(format!(
                "block {}: aligned rows do not cover the node set",
                self.id
            )));
        }
        for (node, row) in rows {
            let content: Vec<u8> = row.iter().copied().filter(|&byte| byte != GAP).collect();
            if content != self.materialize(*node)? {
                return Err(Error::Invariant(format!(
                    "block {}: aligned row of node {node} changes its sequence",
                    self.id
                )));
            }
        }

        let modal = modal_row(rows, None);
        self.apply_matrix(rows, &modal)
    }

    /// Re-derive all block fields from an aligned matrix and its consensus
    /// row. Gap runs keep their full reserved width; anchors nobody inserts
    /// at are dropped along with their columns.
    fn apply_matrix(&mut self, rows: &[(NodeId, Vec<u8>)], modal: &[u8]) -> Result<()> {
        let width = modal.len();
        if rows.iter().any(|(_, row)| row.len() != width) {
            return Err(Error::Invariant(format!(
                "block {}: ragged alignment matrix",
                self.id
            )));
        }

        let mut consensus = Vec::with_capacity(width);
        let mut columns = Vec::with_capacity(width);
        let mut run_start = 0;
        let mut run_width = 0;
        let mut gap_runs: BTreeMap<usize, usize> = BTreeMap::new();
        for (column, &byte) in modal.iter().enumerate() {
            if byte == GAP {
                if run_width == 0 {
                    run_start = column;
                }
                run_width += 1;
                columns.push(Column::Gap {
                    anchor: consensus.len(),
                    run_start,
                });
            } else {
                if run_width > 0 {
                    gap_runs.insert(consensus.len(), run_width);
                    run_width = 0;
                }
                columns.push(Column::Base(consensus.len()));
                consensus.push(byte);
            }
        }
        if run_width > 0 {
            gap_runs.insert(consensus.len(), run_width);
        }

        let mut substitutions: HashMap<NodeId, Substitutions> = HashMap::new();
        let mut insertions: HashMap<NodeId, Insertions> = HashMap::new();
        let mut deletions: HashMap<NodeId, Deletions> = HashMap::new();

        for (node, row) in rows {
            let node_substitutions = substitutions.entry(*node).or_default();
            let node_insertions = insertions.entry(*node).or_default();
            let node_deletions = deletions.entry(*node).or_default();

            let mut deletion: Option<(usize, usize)> = None;
            let mut insertion: Option<(usize, usize, Vec<u8>)> = None;
            for (column, (&row_byte, &modal_byte)) in row.iter().zip(modal.iter()).enumerate() {
                match columns[column] {
                    Column::Base(position) => {
                        if let Some((anchor, offset, bytes)) = insertion.take() {
                            node_insertions.insert((anchor, offset), bytes);
                        }
                        if row_byte == GAP {
                            deletion = match deletion.take() {
                                Some((start, length)) if start + length == position => {
                                    Some((start, length + 1))
                                }
                                other => {
                                    if let Some(run) = other {
                                        node_deletions.insert(run.0, run.1);
                                    }
                                    Some((position, 1))
                                }
                            };
                        } else {
                            if let Some((start, length)) = deletion.take() {
                                node_deletions.insert(start, length);
                            }
                            if row_byte != modal_byte {
                                node_substitutions.insert(position, row_byte);
                            }
                        }
                    }
                    Column::Gap { anchor, run_start } => {
                        if row_byte == GAP {
                            if let Some((anchor, offset, bytes)) = insertion.take() {
                                node_insertions.insert((anchor, offset), bytes);
                            }
                        } else {
                            // A filled gap column interrupts any deletion run.
                            if let Some((start, length)) = deletion.take() {
                                node_deletions.insert(start, length);
                            }
                            match &mut insertion {
                                Some((_, _, bytes)) => bytes.push(row_byte),
                                None => {
                                    insertion =
                                        Some((anchor, column - run_start, vec![row_byte]));
                                }
                            }
                        }
                    }
                }
            }
            if let Some((start, length)) = deletion {
                node_deletions.insert(start, length);
            }
            if let Some((anchor, offset, bytes)) = insertion {
                node_insertions.insert((anchor, offset), bytes);
            }
        }

        let gaps: BTreeMap<usize, usize> = gap_runs
            .into_iter()
            .filter(|(anchor, _)| {
                insertions
                    .values()
                    .any(|map| map.keys().any(|&(a, _)| a == *anchor))
            })
            .collect();

        trace!(
            "block {}: consensus rebuilt, {} -> {} columns",
            self.id,
            width,
            consensus.len() + gaps.values().sum::<usize>()
        );

        self.consensus = consensus;
        self.gaps = gaps;
        self.substitutions = substitutions;
        self.insertions = insertions;
        self.deletions = deletions;
        Ok(())
    }
}

/// The column-wise plurality over `rows`. A tie keeps the byte of
/// `tie_break` (the stored consensus) when it is among the winners, and the
/// smallest winning byte otherwise.
fn modal_row(rows: &[(NodeId, Vec<u8>)], tie_break: Option<&[u8]>) -> Vec<u8> {
    let width = rows.first().map(|(_, row)| row.len()).unwrap_or(0);
    let mut modal = Vec::with_capacity(width);

    for column in 0..width {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for (_, row) in rows {
            *counts.entry(row[column]).or_default() += 1;
        }
        let best = counts.values().copied().max().unwrap_or(0);
        let preferred = tie_break.map(|row| row[column]);
        let winner = match preferred {
            Some(byte) if counts.get(&byte).copied().unwrap_or(0) == best => byte,
            _ => counts
                .iter()
                .filter(|&(_, &count)| count == best)
                .map(|(&byte, _)| byte)
                .next()
                .unwrap_or(GAP),
        };
        modal.push(winner);
    }
    modal
}
