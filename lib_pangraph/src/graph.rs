//! The graph: single owner of all blocks, nodes and paths.
//!
//! Paths and allele maps refer to nodes by id, nodes refer to blocks by id;
//! every mutation goes through the graph so the tables never disagree.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info};

use crate::block::{Block, BlockId};
use crate::error::{Error, Result};
use crate::io::fasta::FastaRecord;
use crate::node::{Node, NodeId, Strand};
use crate::path::Path;

mod detransitive;


#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) blocks: HashMap<BlockId, Block>,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) paths: BTreeMap<String, Path>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphStatistics {
    pub blocks: usize,
    pub paths: usize,
    pub consensus_length: usize,
    pub mean_depth: f64,
}

impl Graph {
    pub fn new() -> Self {
        Default::default()
    }

    /// Build a singleton graph: one block and one path per input record.
    pub fn build(records: Vec<FastaRecord>, circular: bool) -> Result<Self> {
        let mut graph = Self::new();
        for record in records {
            graph.add_genome(record.name, record.sequence, circular)?;
        }
        info!(
            "built graph with {} singleton blocks",
            graph.blocks.len()
        );
        Ok(graph)
    }

    pub fn add_genome(&mut self, name: String, sequence: Vec<u8>, circular: bool) -> Result<()> {
        if self.paths.contains_key(&name) {
            return Err(Error::DuplicatePathName(name));
        }
        let node = NodeId::random();
        let block = Block::from_consensus(sequence, [node]);
        self.nodes.insert(node, Node::new(block.id(), Strand::Forward));
        self.paths
            .insert(name.clone(), Path::new(name, vec![node], circular));
        self.blocks.insert(block.id(), block);
        Ok(())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Block ids in sorted order, for deterministic iteration.
    pub fn block_ids(&self) -> Vec<BlockId> {
        let mut ids: Vec<_> = self.blocks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Materialize one genome: the node bytes concatenated in path order,
    /// reverse-strand nodes reverse-complemented, circular paths rotated by
    /// `offset` back to the original origin.
    pub fn sequence(&self, name: &str) -> Result<Vec<u8>> {
        let path = self
            .paths
            .get(name)
            .ok_or_else(|| Error::UnknownPath(name.to_string()))?;

        let mut concatenation = Vec::new();
        for &node_id in path.nodes() {
            let bytes = self.node_sequence(node_id)?;
            concatenation.extend_from_slice(&bytes);
        }

        if path.circular() && !concatenation.is_empty() {
            let offset = path.offset() % concatenation.len();
            concatenation.rotate_left(offset);
        }
        Ok(concatenation)
    }

    /// The bytes a single node contributes to its path, strand applied.
    pub fn node_sequence(&self, node_id: NodeId) -> Result<Vec<u8>> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| Error::Invariant(format!("unregistered node {node_id}")))?;
        let block = self
            .blocks
            .get(&node.block)
            .ok_or_else(|| Error::UnknownBlock(node.block.to_string()))?;
        let bytes = block.materialize(node_id)?;
        Ok(match node.strand {
            Strand::Forward => bytes,
            Strand::Reverse => crate::sequence::reverse_complement(&bytes),
        })
    }

    /// Drop every block no path references, and the node entries that go
    /// with it.
    pub fn prune(&mut self) {
        let referenced: HashSet<BlockId> = self
            .paths
            .values()
            .flat_map(|path| path.nodes())
            .filter_map(|node| self.nodes.get(node).map(|entry| entry.block))
            .collect();
        let before = self.blocks.len();
        self.blocks.retain(|id, _| referenced.contains(id));
        self.nodes.retain(|_, node| referenced.contains(&node.block));
        if self.blocks.len() < before {
            debug!("pruned {} unreferenced blocks", before - self.blocks.len());
        }
    }

    /// Drop every node whose materialized sequence is empty, then prune.
    pub fn purge(&mut self) -> Result<()> {
        let mut empty: HashSet<NodeId> = HashSet::new();
        for path in self.paths.values() {
            for &node_id in path.nodes() {
                let node = self
                    .nodes
                    .get(&node_id)
                    .ok_or_else(|| Error::Invariant(format!("unregistered node {node_id}")))?;
                let block = self
                    .blocks
                    .get(&node.block)
                    .ok_or_else(|| Error::UnknownBlock(node.block.to_string()))?;
                if block.materialized_len(node_id)? == 0 {
                    empty.insert(node_id);
                }
            }
        }
        if empty.is_empty() {
            return Ok(());
        }

        debug!("purging {} empty nodes", empty.len());
        for path in self.paths.values_mut() {
            path.remove_nodes(&empty);
        }
        for node_id in empty {
            if let Some(node) = self.nodes.remove(&node_id) {
                if let Some(block) = self.blocks.get_mut(&node.block) {
                    block.drop_node(node_id);
                }
            }
        }
        self.prune();
        Ok(())
    }

    /// Keep only the named paths; everything else is dropped and pruned.
    pub fn keep_only(&mut self, names: &HashSet<String>) {
        let dropped: Vec<String> = self
            .paths
            .keys()
            .filter(|name| !names.contains(*name))
            .cloned()
            .collect();
        for name in dropped {
            let path = self.paths.remove(&name).expect("listed above");
            for &node_id in path.nodes() {
                if let Some(node) = self.nodes.remove(&node_id) {
                    if let Some(block) = self.blocks.get_mut(&node.block) {
                        block.drop_node(node_id);
                    }
                }
            }
        }
        self.prune();
    }

    /// Project the graph onto a subset of genomes: keep only the named
    /// paths, then collapse the chains that become redundant without the
    /// other genomes.
    pub fn marginalize(&mut self, names: &HashSet<String>) -> Result<()> {
        self.keep_only(names);
        self.detransitive()?;
        Ok(())
    }

    /// Recompute every path's per-node start offsets on its reconstructed
    /// genome.
    pub fn finalize(&mut self) -> Result<()> {
        let names: Vec<String> = self.paths.keys().cloned().collect();
        for name in names {
            let path = &self.paths[&name];
            let mut lengths = Vec::with_capacity(path.nodes().len());
            for &node_id in path.nodes() {
                let node = self
                    .nodes
                    .get(&node_id)
                    .ok_or_else(|| Error::Invariant(format!("unregistered node {node_id}")))?;
                lengths.push(self.blocks[&node.block].materialized_len(node_id)?);
            }
            let total: usize = lengths.iter().sum();

            let path = self.paths.get_mut(&name).expect("listed above");
            let mut position = Vec::with_capacity(lengths.len());
            let mut cursor = 0;
            for length in lengths {
                let start = if path.circular() && total > 0 {
                    (cursor + total - path.offset() % total) % total
                } else {
                    cursor
                };
                position.push(start);
                cursor += length;
            }
            path.set_position(position);
        }
        Ok(())
    }

    pub fn statistics(&self) -> GraphStatistics {
        let depth_sum: usize = self.blocks.values().map(Block::depth).sum();
        GraphStatistics {
            blocks: self.blocks.len(),
            paths: self.paths.len(),
            consensus_length: self.blocks.values().map(Block::len).sum(),
            mean_depth: if self.blocks.is_empty() {
                0.0
            } else {
                depth_sum as f64 / self.blocks.len() as f64
            },
        }
    }

    /// Structural invariant sweep over the whole arena.
    pub fn check(&self) -> Result<()> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        for path in self.paths.values() {
            for &node_id in path.nodes() {
                if !seen.insert(node_id) {
                    return Err(Error::Invariant(format!(
                        "node {node_id} appears on more than one path position"
                    )));
                }
                let node = self.nodes.get(&node_id).ok_or_else(|| {
                    Error::Invariant(format!("path node {node_id} is unregistered"))
                })?;
                let block = self.blocks.get(&node.block).ok_or_else(|| {
                    Error::Invariant(format!("node {node_id} references a missing block"))
                })?;
                if !block.contains_node(node_id) {
                    return Err(Error::Invariant(format!(
                        "block {} does not carry alleles for node {node_id}",
                        block.id()
                    )));
                }
            }
        }
        for block in self.blocks.values() {
            block.check()?;
            if block.depth() == 0 {
                return Err(Error::Invariant(format!(
                    "block {} is retained but no path references it",
                    block.id()
                )));
            }
            for node_id in block.node_ids() {
                if !seen.contains(&node_id) {
                    return Err(Error::Invariant(format!(
                        "block {} keys node {node_id} that no path traverses",
                        block.id()
                    )));
                }
            }
        }
        Ok(())
    }
}
