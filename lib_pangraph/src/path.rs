//! Paths: one genome as an ordered, optionally circular walk over nodes.

use crate::node::NodeId;

/// One genome. The node list concatenates, in order, to the genome sequence;
/// for circular genomes the concatenation is rotated so that the original
/// input starts `offset` nucleotides into it.
#[derive(Debug, Clone)]
pub struct Path {
    name: String,
    nodes: Vec<NodeId>,
    offset: usize,
    circular: bool,
    position: Vec<usize>,
}

impl Path {
    pub fn new(name: String, nodes: Vec<NodeId>, circular: bool) -> Self {
        Self {
            name,
            nodes,
            offset: 0,
            circular,
            position: Vec::new(),
        }
    }

    pub(crate) fn with_offset(
        name: String,
        nodes: Vec<NodeId>,
        circular: bool,
        offset: usize,
    ) -> Self {
        Self {
            name,
            nodes,
            offset,
            circular,
            position: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn circular(&self) -> bool {
        self.circular
    }

    /// Per-node start offsets on the reconstructed genome; empty until the
    /// graph is finalized.
    pub fn position(&self) -> &[usize] {
        &self.position
    }

    pub(crate) fn set_position(&mut self, position: Vec<usize>) {
        self.position = position;
    }

    pub(crate) fn clear_position(&mut self) {
        self.position.clear();
    }

    /// Replace every occurrence listed in `replacements` (node to its ordered
    /// substitutes) in one pass. Positions become stale and are cleared.
    pub(crate) fn splice_nodes(
        &mut self,
        replacements: &std::collections::HashMap<NodeId, Vec<NodeId>>,
    ) {
        if self.nodes.iter().any(|node| replacements.contains_key(node)) {
            self.nodes = self
                .nodes
                .iter()
                .flat_map(|node| match replacements.get(node) {
                    Some(expansion) => expansion.clone(),
                    None => vec![*node],
                })
                .collect();
            self.clear_position();
        }
    }

    pub(crate) fn remove_nodes(&mut self, nodes: &std::collections::HashSet<NodeId>) {
        if self.nodes.iter().any(|node| nodes.contains(node)) {
            self.nodes.retain(|node| !nodes.contains(node));
            self.clear_position();
        }
    }

    /// Rotate the node list left by `count` nodes, compensating `offset` by
    /// the rotated-away nucleotide length so the reconstructed genome is
    /// unchanged. Only meaningful for circular paths.
    pub(crate) fn rotate_left(&mut self, count: usize, rotated_nt: usize, total_nt: usize) {
        if count == 0 || self.nodes.is_empty() {
            return;
        }
        let len = self.nodes.len();
        self.nodes.rotate_left(count % len);
        if total_nt > 0 {
            self.offset = (self.offset + total_nt - rotated_nt % total_nt) % total_nt;
        }
        self.clear_position();
    }

    /// Replace the contiguous run `start..start + length` with a single
    /// node. Wrapping runs on circular paths must be rotated into a
    /// contiguous position first.
    pub(crate) fn replace_run(&mut self, start: usize, length: usize, replacement: NodeId) {
        self.nodes.splice(start..start + length, [replacement]);
        self.clear_position();
    }
}
