//! Detransitive edge contraction: fuse chains of blocks that every genome
//! traverses together, in the same orientation, every time.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, trace};

use crate::block::{Block, BlockId};
use crate::error::{Error, Result};
use crate::node::{Node, NodeId, Strand};

use super::Graph;

/// An oriented block: one side of a junction, or one link of a chain.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Entry {
    block: BlockId,
    strand: Strand,
}

impl Entry {
    fn flip(self) -> Self {
        Self {
            block: self.block,
            strand: self.strand.flip(),
        }
    }
}

/// A junction between two adjacent nodes, canonicalized so that a traversal
/// and its mirror image count as the same junction.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Junction {
    left: Entry,
    right: Entry,
}

impl Junction {
    fn canonical(left: Entry, right: Entry) -> Self {
        let forward = Self { left, right };
        let mirror = Self {
            left: right.flip(),
            right: left.flip(),
        };
        forward.min(mirror)
    }
}

/// Per-genome occurrence counts. Junctions are transitive only when these
/// agree exactly, so a genome touching a block twice but crossing the
/// junction once keeps the chain apart.
type IsolateCounts = BTreeMap<String, usize>;

/// One full walk of a chain by one path: `start` is the path index of the
/// first node in path order, `nodes` the run in path order.
struct Traversal {
    path: String,
    start: usize,
    forward: bool,
    nodes: Vec<NodeId>,
}

impl Graph {
    /// Contract every maximal chain of transitive junctions into a single
    /// block. Returns the number of chains fused.
    pub fn detransitive(&mut self) -> Result<usize> {
        let mut block_counts: HashMap<BlockId, IsolateCounts> = HashMap::new();
        let mut junction_counts: HashMap<Junction, IsolateCounts> = HashMap::new();

        for (name, path) in &self.paths {
            let nodes = path.nodes();
            for &node_id in nodes {
                let node = &self.nodes[&node_id];
                *block_counts
                    .entry(node.block)
                    .or_default()
                    .entry(name.clone())
                    .or_default() += 1;
            }
            let pair_count = if path.circular() && nodes.len() > 1 {
                nodes.len()
            } else {
                nodes.len().saturating_sub(1)
            };
            for index in 0..pair_count {
                let left = self.entry_of(nodes[index]);
                let right = self.entry_of(nodes[(index + 1) % nodes.len()]);
                *junction_counts
                    .entry(Junction::canonical(left, right))
                    .or_default()
                    .entry(name.clone())
                    .or_default() += 1;
            }
        }

        let mut transitive: Vec<Junction> = junction_counts
            .iter()
            .filter(|(junction, crossings)| {
                junction.left.block != junction.right.block
                    && block_counts[&junction.left.block] == **crossings
                    && block_counts[&junction.right.block] == **crossings
            })
            .map(|(junction, _)| *junction)
            .collect();
        transitive.sort_unstable();
        trace!("{} transitive junctions", transitive.len());

        let chains = thread_chains(&transitive)?;
        let mut fused = 0;
        for chain in chains.into_iter().filter(|chain| chain.len() >= 2) {
            self.fuse_chain(&chain)?;
            fused += 1;
        }
        if fused > 0 {
            debug!("fused {fused} transitive chains");
        }
        Ok(fused)
    }

    fn entry_of(&self, node_id: NodeId) -> Entry {
        let node = &self.nodes[&node_id];
        Entry {
            block: node.block,
            strand: node.strand,
        }
    }

    fn fuse_chain(&mut self, chain: &[Entry]) -> Result<()> {
        let k = chain.len();
        let chain_blocks: HashSet<BlockId> = chain.iter().map(|entry| entry.block).collect();
        let first = chain[0];
        let reverse_start = chain[k - 1].flip();

        // Locate every traversal. Transitivity guarantees each occurrence of
        // a chain block sits inside a complete run; anything else is fatal.
        let mut traversals: Vec<Traversal> = Vec::new();
        for (name, path) in &self.paths {
            let nodes = path.nodes();
            let n = nodes.len();
            let mut consumed = vec![false; n];
            for index in 0..n {
                if consumed[index] {
                    continue;
                }
                let entry = self.entry_of(nodes[index]);
                let forward = if entry == first {
                    true
                } else if entry == reverse_start {
                    false
                } else {
                    continue;
                };
                if k > n {
                    return Err(Error::Invariant(format!(
                        "chain of {k} blocks cannot fit path {name}"
                    )));
                }
                let mut run = Vec::with_capacity(k);
                for step in 0..k {
                    let position = if index + step < n {
                        index + step
                    } else if path.circular() {
                        (index + step) % n
                    } else {
                        return Err(Error::Invariant(format!(
                            "chain traversal runs off the end of linear path {name}"
                        )));
                    };
                    let expected = if forward {
                        chain[step]
                    } else {
                        chain[k - 1 - step].flip()
                    };
                    if self.entry_of(nodes[position]) != expected {
                        return Err(Error::Invariant(format!(
                            "partial chain traversal on path {name} at node index {position}"
                        )));
                    }
                    consumed[position] = true;
                    run.push(nodes[position]);
                }
                traversals.push(Traversal {
                    path: name.clone(),
                    start: index,
                    forward,
                    nodes: run,
                });
            }
            for index in 0..n {
                let entry = self.entry_of(nodes[index]);
                if !consumed[index] && chain_blocks.contains(&entry.block) {
                    return Err(Error::Invariant(format!(
                        "node of block {} on path {name} escapes its chain",
                        entry.block
                    )));
                }
            }
        }

        // One new node per traversal; per chain slot, map the old node of
        // every traversal to that traversal's new node.
        let mut slot_mappings: Vec<HashMap<NodeId, NodeId>> = vec![HashMap::new(); k];
        let mut new_nodes: Vec<(NodeId, Strand)> = Vec::with_capacity(traversals.len());
        for traversal in &traversals {
            let fresh = NodeId::random();
            new_nodes.push((
                fresh,
                if traversal.forward {
                    Strand::Forward
                } else {
                    Strand::Reverse
                },
            ));
            for (step, &old) in traversal.nodes.iter().enumerate() {
                let slot = if traversal.forward { step } else { k - 1 - step };
                slot_mappings[slot].insert(old, fresh);
            }
        }

        let mut oriented = Vec::with_capacity(k);
        for (slot, entry) in chain.iter().enumerate() {
            let block = self.blocks[&entry.block].clone();
            let mut block = if entry.strand.is_reverse() {
                block.reverse_complement()
            } else {
                block
            };
            block.rekey(&slot_mappings[slot]);
            oriented.push(block);
        }
        let fused = Block::concatenate(&oriented)?;
        let fused_id = fused.id();
        for &(fresh, strand) in &new_nodes {
            self.nodes.insert(fresh, Node::new(fused_id, strand));
        }
        self.blocks.insert(fused_id, fused);

        // Rewire the paths: rotate a wrapped run to the front first, then
        // splice runs back to front so indices stay valid.
        let mut by_path: HashMap<String, Vec<(usize, NodeId)>> = HashMap::new();
        for (traversal, &(fresh, _)) in traversals.iter().zip(&new_nodes) {
            by_path
                .entry(traversal.path.clone())
                .or_default()
                .push((traversal.start, fresh));
        }
        for (name, mut runs) in by_path {
            let path = &self.paths[&name];
            let n = path.nodes().len();
            if let Some(wrapped_at) = runs
                .iter()
                .map(|&(start, _)| start)
                .find(|&start| start + k > n)
            {
                let mut lengths = Vec::with_capacity(n);
                let mut total = 0;
                for &node_id in path.nodes() {
                    let node = &self.nodes[&node_id];
                    let length = self.blocks[&node.block].materialized_len(node_id)?;
                    lengths.push(length);
                    total += length;
                }
                let rotated_nt: usize = lengths[..wrapped_at].iter().sum();
                self.paths
                    .get_mut(&name)
                    .expect("path listed above")
                    .rotate_left(wrapped_at, rotated_nt, total);
                for (start, _) in &mut runs {
                    *start = (*start + n - wrapped_at) % n;
                }
            }
            runs.sort_unstable_by_key(|&(start, _)| std::cmp::Reverse(start));
            let path = self.paths.get_mut(&name).expect("path listed above");
            for (start, fresh) in runs {
                path.replace_run(start, k, fresh);
            }
        }

        for traversal in &traversals {
            for old in &traversal.nodes {
                self.nodes.remove(old);
            }
        }
        for block in &chain_blocks {
            self.blocks.remove(block);
        }
        Ok(())
    }
}

/// Thread sorted transitive junctions into maximal oriented chains. A
/// junction meeting a chain anywhere but at a compatible end is a fatal
/// invariant failure; one closing a chain into a cycle is skipped.
fn thread_chains(junctions: &[Junction]) -> Result<Vec<Vec<Entry>>> {
    let mut chains: Vec<Vec<Entry>> = Vec::new();
    let mut location: HashMap<BlockId, usize> = HashMap::new();

    for junction in junctions {
        let left = junction.left;
        let right = junction.right;
        match (
            location.get(&left.block).copied(),
            location.get(&right.block).copied(),
        ) {
            (None, None) => {
                chains.push(vec![left, right]);
                location.insert(left.block, chains.len() - 1);
                location.insert(right.block, chains.len() - 1);
            }
            (Some(at), None) => {
                attach_right(&mut chains[at], left, right)?;
                location.insert(right.block, at);
            }
            (None, Some(at)) => {
                attach_left(&mut chains[at], left, right)?;
                location.insert(left.block, at);
            }
            (Some(at), Some(other)) if at == other => {
                debug!(
                    "skipping junction closing a cycle over block {}",
                    left.block
                );
            }
            (Some(at), Some(other)) => {
                // Orient both chains so `at` ends with `left` and `other`
                // starts with `right`, then join them.
                if chains[at].last() != Some(&left) {
                    if chains[at].first() != Some(&left.flip()) {
                        return Err(interior_failure(left));
                    }
                    reverse_chain(&mut chains[at]);
                }
                if chains[other].first() != Some(&right) {
                    if chains[other].last() != Some(&right.flip()) {
                        return Err(interior_failure(right));
                    }
                    reverse_chain(&mut chains[other]);
                }
                let absorbed = std::mem::take(&mut chains[other]);
                for entry in &absorbed {
                    location.insert(entry.block, at);
                }
                chains[at].extend(absorbed);
            }
        }
    }
    Ok(chains)
}

fn attach_right(chain: &mut Vec<Entry>, left: Entry, right: Entry) -> Result<()> {
    if chain.last() == Some(&left) {
        chain.push(right);
        Ok(())
    } else if chain.first() == Some(&left.flip()) {
        chain.insert(0, right.flip());
        Ok(())
    } else {
        Err(interior_failure(left))
    }
}

fn attach_left(chain: &mut Vec<Entry>, left: Entry, right: Entry) -> Result<()> {
    if chain.first() == Some(&right) {
        chain.insert(0, left);
        Ok(())
    } else if chain.last() == Some(&right.flip()) {
        chain.push(left.flip());
        Ok(())
    } else {
        Err(interior_failure(right))
    }
}

fn reverse_chain(chain: &mut [Entry]) {
    chain.reverse();
    for entry in chain {
        *entry = entry.flip();
    }
}

fn interior_failure(entry: Entry) -> Error {
    Error::Invariant(format!(
        "transitive junction meets block {} away from a compatible chain end",
        entry.block
    ))
}
