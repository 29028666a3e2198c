//! Blocks: the unit of homology.
//!
//! A block stores one consensus sequence together with a gap table (reserved
//! alignment columns) and, per node, three sparse allele maps: substitutions,
//! insertions and deletions. Applying a node's alleles to the consensus
//! reproduces exactly the genomic substring that node represents.
//!
//! Insertions and gaps are keyed by the consensus position they sit in front
//! of: key `p` denotes the column range between positions `p - 1` and `p`,
//! with `0` before the first base and `len` after the last. Deletions and
//! substitutions are keyed by the position they affect.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::ops::Range;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::sequence::{self, GAP};

mod reconsensus;


/// Sparse substitutions: consensus position to substituted base.
pub type Substitutions = BTreeMap<usize, u8>;
/// Sparse insertions: (anchor, offset within the gap) to inserted bytes.
pub type Insertions = BTreeMap<(usize, usize), Vec<u8>>;
/// Sparse deletions: start position to deleted length.
pub type Deletions = BTreeMap<usize, usize>;

/// Opaque stable identity of a block, assigned at creation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(u64);

impl BlockId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    consensus: Vec<u8>,
    gaps: BTreeMap<usize, usize>,
    pub(crate) substitutions: HashMap<NodeId, Substitutions>,
    pub(crate) insertions: HashMap<NodeId, Insertions>,
    pub(crate) deletions: HashMap<NodeId, Deletions>,
}

/// One entry of a node's sorted edit walk. At equal positions an insertion
/// (which sits in front of the position) precedes a deletion or substitution
/// (which consume the position itself).
#[derive(Debug)]
enum Edit<'a> {
    Insertion {
        anchor: usize,
        offset: usize,
        sequence: &'a [u8],
    },
    Deletion {
        at: usize,
        length: usize,
    },
    Substitution {
        at: usize,
        base: u8,
    },
}

impl Edit<'_> {
    fn sort_key(&self) -> (usize, u8, usize) {
        match self {
            Edit::Insertion { anchor, offset, .. } => (*anchor, 0, *offset),
            Edit::Deletion { at, .. } => (*at, 1, 0),
            Edit::Substitution { at, .. } => (*at, 1, 0),
        }
    }
}

impl Block {
    /// A fresh block whose consensus carries no variation for any of `nodes`.
    pub fn from_consensus(consensus: Vec<u8>, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut block = Self {
            id: BlockId::random(),
            consensus,
            gaps: BTreeMap::new(),
            substitutions: HashMap::new(),
            insertions: HashMap::new(),
            deletions: HashMap::new(),
        };
        for node in nodes {
            block.add_node(node);
        }
        block
    }

    pub(crate) fn from_parts(
        id: BlockId,
        consensus: Vec<u8>,
        gaps: BTreeMap<usize, usize>,
        substitutions: HashMap<NodeId, Substitutions>,
        insertions: HashMap<NodeId, Insertions>,
        deletions: HashMap<NodeId, Deletions>,
    ) -> Self {
        Self {
            id,
            consensus,
            gaps,
            substitutions,
            insertions,
            deletions,
        }
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn into_parts(
        self,
    ) -> (
        BlockId,
        Vec<u8>,
        BTreeMap<usize, usize>,
        HashMap<NodeId, Substitutions>,
        HashMap<NodeId, Insertions>,
        HashMap<NodeId, Deletions>,
    ) {
        (
            self.id,
            self.consensus,
            self.gaps,
            self.substitutions,
            self.insertions,
            self.deletions,
        )
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn consensus(&self) -> &[u8] {
        &self.consensus
    }

    pub fn len(&self) -> usize {
        self.consensus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consensus.is_empty()
    }

    /// The number of distinct nodes keyed into the allele maps.
    pub fn depth(&self) -> usize {
        self.substitutions.len()
    }

    pub fn gaps(&self) -> &BTreeMap<usize, usize> {
        &self.gaps
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.substitutions.contains_key(&node)
    }

    /// All nodes of this block, in sorted order for deterministic iteration.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.substitutions.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn substitutions_of(&self, node: NodeId) -> Option<&Substitutions> {
        self.substitutions.get(&node)
    }

    pub fn insertions_of(&self, node: NodeId) -> Option<&Insertions> {
        self.insertions.get(&node)
    }

    pub fn deletions_of(&self, node: NodeId) -> Option<&Deletions> {
        self.deletions.get(&node)
    }

    pub(crate) fn add_node(&mut self, node: NodeId) {
        self.substitutions.entry(node).or_default();
        self.insertions.entry(node).or_default();
        self.deletions.entry(node).or_default();
    }

    /// Remove a node's alleles, tightening the gap table so that only anchors
    /// still backed by an insertion remain reserved.
    pub(crate) fn drop_node(&mut self, node: NodeId) {
        self.substitutions.remove(&node);
        self.insertions.remove(&node);
        self.deletions.remove(&node);
        self.tighten_gaps();
    }

    fn tighten_gaps(&mut self) {
        let mut reach: BTreeMap<usize, usize> = BTreeMap::new();
        for insertions in self.insertions.values() {
            for (&(anchor, offset), sequence) in insertions {
                let entry = reach.entry(anchor).or_default();
                *entry = (*entry).max(offset + sequence.len());
            }
        }
        self.gaps = reach;
    }

    /// Rename node keys according to `mapping`; unmapped keys are kept.
    pub(crate) fn rekey(&mut self, mapping: &HashMap<NodeId, NodeId>) {
        fn rekey_map<V>(map: &mut HashMap<NodeId, V>, mapping: &HashMap<NodeId, NodeId>) {
            let keys: Vec<_> = map.keys().copied().collect();
            for old in keys {
                if let Some(&new) = mapping.get(&old) {
                    if let Some(value) = map.remove(&old) {
                        map.insert(new, value);
                    }
                }
            }
        }
        rekey_map(&mut self.substitutions, mapping);
        rekey_map(&mut self.insertions, mapping);
        rekey_map(&mut self.deletions, mapping);
    }

    fn edits(&self, node: NodeId) -> Result<Vec<Edit<'_>>> {
        let substitutions = self.substitutions.get(&node);
        let insertions = self.insertions.get(&node);
        let deletions = self.deletions.get(&node);
        let (Some(substitutions), Some(insertions), Some(deletions)) =
            (substitutions, insertions, deletions)
        else {
            return Err(Error::UnknownNode {
                block: self.id.to_string(),
                node: node.to_string(),
            });
        };

        let mut edits: Vec<Edit> = Vec::with_capacity(
            substitutions.len() + insertions.len() + deletions.len(),
        );
        edits.extend(substitutions.iter().map(|(&at, &base)| Edit::Substitution {
            at,
            base,
        }));
        edits.extend(
            insertions
                .iter()
                .map(|(&(anchor, offset), sequence)| Edit::Insertion {
                    anchor,
                    offset,
                    sequence,
                }),
        );
        edits.extend(deletions.iter().map(|(&at, &length)| Edit::Deletion {
            at,
            length,
        }));
        edits.sort_by_key(Edit::sort_key);
        Ok(edits)
    }

    /// Reconstruct the unaligned bytes of the genomic substring `node`
    /// represents. The result has length
    /// `len(consensus) + sum(insertions) - sum(deletions)`.
    pub fn materialize(&self, node: NodeId) -> Result<Vec<u8>> {
        let edits = self.edits(node)?;
        let mut output = Vec::with_capacity(self.consensus.len());
        let mut read = 0;

        for edit in edits {
            match edit {
                Edit::Insertion { anchor, sequence, .. } => {
                    if anchor > read {
                        output.extend_from_slice(&self.consensus[read..anchor]);
                        read = anchor;
                    }
                    output.extend_from_slice(sequence);
                }
                Edit::Deletion { at, length } => {
                    if at > read {
                        output.extend_from_slice(&self.consensus[read..at]);
                    }
                    read = read.max(at + length);
                }
                Edit::Substitution { at, base } => {
                    if at >= read {
                        output.extend_from_slice(&self.consensus[read..at]);
                        output.push(base);
                        read = at + 1;
                    }
                }
            }
        }
        output.extend_from_slice(&self.consensus[read..]);
        Ok(output)
    }

    /// The materialized length of `node` without building the bytes.
    pub fn materialized_len(&self, node: NodeId) -> Result<usize> {
        let inserted: usize = self
            .insertions
            .get(&node)
            .ok_or_else(|| Error::UnknownNode {
                block: self.id.to_string(),
                node: node.to_string(),
            })?
            .values()
            .map(|sequence| sequence.len())
            .sum();
        let deleted: usize = self.deletions[&node].values().sum();
        Ok(self.consensus.len() + inserted - deleted)
    }

    /// The total number of alignment columns: consensus length plus all
    /// reserved gap widths.
    pub fn aligned_width(&self) -> usize {
        self.consensus.len() + self.gaps.values().sum::<usize>()
    }

    /// Column index of each consensus position, and of each gap run start.
    fn layout(&self) -> (Vec<usize>, BTreeMap<usize, usize>) {
        let mut base_columns = Vec::with_capacity(self.consensus.len());
        let mut gap_columns = BTreeMap::new();
        let mut column = 0;
        for position in 0..=self.consensus.len() {
            if let Some(&width) = self.gaps.get(&position) {
                gap_columns.insert(position, column);
                column += width;
            }
            if position < self.consensus.len() {
                base_columns.push(column);
                column += 1;
            }
        }
        (base_columns, gap_columns)
    }

    /// The consensus spread over the full alignment width, `-` in every
    /// reserved gap column.
    pub fn consensus_row(&self) -> Vec<u8> {
        let (base_columns, _) = self.layout();
        let mut row = vec![GAP; self.aligned_width()];
        for (position, &column) in base_columns.iter().enumerate() {
            row[column] = self.consensus[position];
        }
        row
    }

    /// The aligned row of `node`: its actual bytes placed into the alignment
    /// columns, `-` everywhere the node carries nothing.
    pub fn aligned_row(&self, node: NodeId) -> Result<Vec<u8>> {
        if !self.contains_node(node) {
            return Err(Error::UnknownNode {
                block: self.id.to_string(),
                node: node.to_string(),
            });
        }
        let (base_columns, gap_columns) = self.layout();
        let mut row = self.consensus_row();

        for (&at, &base) in &self.substitutions[&node] {
            row[base_columns[at]] = base;
        }
        for (&at, &length) in &self.deletions[&node] {
            for position in at..at + length {
                row[base_columns[position]] = GAP;
            }
        }
        for (&(anchor, offset), sequence) in &self.insertions[&node] {
            let start = gap_columns[&anchor] + offset;
            row[start..start + sequence.len()].copy_from_slice(sequence);
        }
        Ok(row)
    }

    /// A new block covering `range` of the consensus, with every allele map
    /// restricted and translated. Deletions spanning either cut are clipped;
    /// a gap keyed at the end of `range` travels with the right-hand
    /// neighbor, except at the end of the block.
    pub fn slice(&self, range: Range<usize>) -> Block {
        let Range { start, end } = range;
        let keeps_anchor = |anchor: usize| {
            anchor >= start && (anchor < end || (anchor == end && end == self.consensus.len()))
        };

        let consensus = self.consensus[start..end].to_vec();
        let gaps = self
            .gaps
            .iter()
            .filter(|&(&anchor, _)| keeps_anchor(anchor))
            .map(|(&anchor, &width)| (anchor - start, width))
            .collect();

        let mut substitutions = HashMap::with_capacity(self.depth());
        let mut insertions = HashMap::with_capacity(self.depth());
        let mut deletions = HashMap::with_capacity(self.depth());
        for node in self.substitutions.keys().copied() {
            substitutions.insert(
                node,
                self.substitutions[&node]
                    .range(start..end)
                    .map(|(&at, &base)| (at - start, base))
                    .collect::<Substitutions>(),
            );
            insertions.insert(
                node,
                self.insertions[&node]
                    .iter()
                    .filter(|&(&(anchor, _), _)| keeps_anchor(anchor))
                    .map(|(&(anchor, offset), sequence)| {
                        ((anchor - start, offset), sequence.clone())
                    })
                    .collect::<Insertions>(),
            );
            deletions.insert(
                node,
                self.deletions[&node]
                    .iter()
                    .filter_map(|(&at, &length)| {
                        let clipped_start = at.max(start);
                        let clipped_end = (at + length).min(end);
                        (clipped_start < clipped_end)
                            .then(|| (clipped_start - start, clipped_end - clipped_start))
                    })
                    .collect::<Deletions>(),
            );
        }

        Block::from_parts(
            BlockId::random(),
            consensus,
            gaps,
            substitutions,
            insertions,
            deletions,
        )
    }

    /// Concatenate blocks sharing one node set into a single block. Boundary
    /// gaps (an end gap meeting the next block's start gap) are merged, with
    /// the right-hand insertions shifted behind the left-hand width.
    pub fn concatenate(parts: &[Block]) -> Result<Block> {
        let Some(first) = parts.first() else {
            return Err(Error::Invariant(
                "cannot concatenate an empty list of blocks".into(),
            ));
        };
        let nodes = first.node_ids();
        for part in parts {
            if part.node_ids() != nodes {
                return Err(Error::Invariant(format!(
                    "concatenation requires a shared node set, but block {} differs from block {}",
                    part.id, first.id
                )));
            }
        }

        let mut consensus = Vec::new();
        let mut gaps: BTreeMap<usize, usize> = BTreeMap::new();
        let mut substitutions: HashMap<NodeId, Substitutions> =
            nodes.iter().map(|&node| (node, BTreeMap::new())).collect();
        let mut insertions: HashMap<NodeId, Insertions> =
            nodes.iter().map(|&node| (node, BTreeMap::new())).collect();
        let mut deletions: HashMap<NodeId, Deletions> =
            nodes.iter().map(|&node| (node, BTreeMap::new())).collect();

        let mut offset = 0;
        for part in parts {
            let boundary_shift = gaps.get(&offset).copied().unwrap_or(0);
            for (&anchor, &width) in &part.gaps {
                *gaps.entry(offset + anchor).or_default() += width;
            }
            for &node in &nodes {
                substitutions.get_mut(&node).unwrap().extend(
                    part.substitutions[&node]
                        .iter()
                        .map(|(&at, &base)| (offset + at, base)),
                );
                deletions.get_mut(&node).unwrap().extend(
                    part.deletions[&node]
                        .iter()
                        .map(|(&at, &length)| (offset + at, length)),
                );
                insertions.get_mut(&node).unwrap().extend(
                    part.insertions[&node].iter().map(
                        |(&(anchor, insertion_offset), sequence)| {
                            let shifted = if anchor == 0 {
                                insertion_offset + boundary_shift
                            } else {
                                insertion_offset
                            };
                            ((offset + anchor, shifted), sequence.clone())
                        },
                    ),
                );
            }
            consensus.extend_from_slice(&part.consensus);
            offset += part.consensus.len();
        }

        Ok(Block::from_parts(
            BlockId::random(),
            consensus,
            gaps,
            substitutions,
            insertions,
            deletions,
        ))
    }

    /// The reverse complement of this block: consensus complemented and
    /// reversed, every allele map remapped to the mirrored coordinates.
    pub fn reverse_complement(&self) -> Block {
        let length = self.consensus.len();
        let consensus = sequence::reverse_complement(&self.consensus);
        let gaps: BTreeMap<usize, usize> = self
            .gaps
            .iter()
            .map(|(&anchor, &width)| (length - anchor, width))
            .collect();

        let mut substitutions = HashMap::with_capacity(self.depth());
        let mut insertions = HashMap::with_capacity(self.depth());
        let mut deletions = HashMap::with_capacity(self.depth());
        for node in self.substitutions.keys().copied() {
            substitutions.insert(
                node,
                self.substitutions[&node]
                    .iter()
                    .map(|(&at, &base)| (length - 1 - at, sequence::complement(base)))
                    .collect::<Substitutions>(),
            );
            deletions.insert(
                node,
                self.deletions[&node]
                    .iter()
                    .map(|(&at, &del_length)| (length - at - del_length, del_length))
                    .collect::<Deletions>(),
            );
            insertions.insert(
                node,
                self.insertions[&node]
                    .iter()
                    .map(|(&(anchor, offset), seq)| {
                        let width = self.gaps[&anchor];
                        (
                            (length - anchor, width - offset - seq.len()),
                            sequence::reverse_complement(seq),
                        )
                    })
                    .collect::<Insertions>(),
            );
        }

        Block::from_parts(
            BlockId::random(),
            consensus,
            gaps,
            substitutions,
            insertions,
            deletions,
        )
    }

    /// Structural invariant sweep. Returns the fatal invariant-violation
    /// error on the first failure.
    pub fn check(&self) -> Result<()> {
        let invariant = |condition: bool, message: &dyn Fn() -> String| {
            if condition {
                Ok(())
            } else {
                Err(Error::Invariant(message()))
            }
        };

        let nodes: HashSet<_> = self.substitutions.keys().copied().collect();
        invariant(
            self.insertions.keys().copied().collect::<HashSet<_>>() == nodes
                && self.deletions.keys().copied().collect::<HashSet<_>>() == nodes,
            &|| format!("block {}: allele maps disagree on the node set", self.id),
        )?;

        let mut anchors_in_use: BTreeMap<usize, usize> = BTreeMap::new();
        for (node, insertions) in &self.insertions {
            for (&(anchor, offset), seq) in insertions {
                invariant(!seq.is_empty(), &|| {
                    format!("block {}: empty insertion for node {node}", self.id)
                })?;
                let width = self.gaps.get(&anchor).copied().unwrap_or(0);
                invariant(anchor <= self.consensus.len() && offset + seq.len() <= width, &|| {
                    format!(
                        "block {}: insertion ({anchor}, {offset}) of node {node} exceeds its gap",
                        self.id
                    )
                })?;
                let reach = anchors_in_use.entry(anchor).or_default();
                *reach = (*reach).max(offset + seq.len());
            }
        }
        invariant(
            anchors_in_use.keys().eq(self.gaps.keys()),
            &|| format!("block {}: gap table out of sync with insertions", self.id),
        )?;

        for (node, substitutions) in &self.substitutions {
            for &at in substitutions.keys() {
                invariant(at < self.consensus.len(), &|| {
                    format!("block {}: substitution at {at} beyond node {node}", self.id)
                })?;
            }
        }

        for (node, deletions) in &self.deletions {
            let mut previous_end = 0;
            for (&at, &length) in deletions {
                invariant(length > 0 && at + length <= self.consensus.len(), &|| {
                    format!("block {}: deletion ({at}, {length}) of node {node} out of bounds", self.id)
                })?;
                invariant(at >= previous_end, &|| {
                    format!("block {}: overlapping deletions at {at} for node {node}", self.id)
                })?;
                previous_end = at + length;

                for position in at..at + length {
                    invariant(!self.substitutions[node].contains_key(&position), &|| {
                        format!(
                            "block {}: substitution inside deletion at {position} for node {node}",
                            self.id
                        )
                    })?;
                }
                for &(anchor, _) in self.insertions[node].keys() {
                    invariant(!(at < anchor && anchor < at + length), &|| {
                        format!(
                            "block {}: insertion anchored inside deletion at {anchor} for node {node}",
                            self.id
                        )
                    })?;
                }
            }
        }

        Ok(())
    }
}
