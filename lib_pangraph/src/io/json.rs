//! The canonical JSON graph document.
//!
//! Nodes are identified on the wire by `{name, number, strand}`: the path
//! name, the 1-based occurrence index of the block on that path, and the
//! traversal orientation. In-memory node ids are regenerated on load, so the
//! round trip preserves everything except hash iteration order and the
//! optional `positions` tooling field.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeId, Strand};
use crate::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    paths: Vec<PathDoc>,
    blocks: Vec<BlockDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PathDoc {
    name: String,
    offset: Option<usize>,
    circular: bool,
    position: Vec<usize>,
    blocks: Vec<NodeDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeDoc {
    id: String,
    name: String,
    number: usize,
    strand: Strand,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
struct NodeKey {
    name: String,
    number: usize,
    strand: Strand,
}

impl NodeKey {
    fn strip(&self) -> String {
        format!("{}#{}{}", self.name, self.number, self.strand)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockDoc {
    id: String,
    sequence: String,
    gaps: BTreeMap<String, usize>,
    mutate: Vec<(NodeKey, Vec<(usize, String)>)>,
    insert: Vec<(NodeKey, Vec<((usize, usize), String)>)>,
    delete: Vec<(NodeKey, Vec<(usize, usize)>)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    positions: Option<BTreeMap<String, (usize, usize)>>,
}

pub fn write_json(graph: &Graph, writer: impl Write) -> Result<()> {
    serde_json::to_writer(writer, &marshal(graph)?)?;
    Ok(())
}

pub fn read_json(mut reader: impl Read) -> Result<Graph> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    let document: GraphDoc = serde_json::from_str(&input)?;
    unmarshal(document)
}

fn marshal(graph: &Graph) -> Result<GraphDoc> {
    // Wire identity and, after finalize, genome coordinates per node.
    let mut keys: HashMap<NodeId, NodeKey> = HashMap::new();
    let mut spans: HashMap<NodeId, (usize, usize)> = HashMap::new();

    for path in graph.paths() {
        let mut occurrences: HashMap<BlockId, usize> = HashMap::new();
        let lengths: Vec<usize> = path
            .nodes()
            .iter()
            .map(|&node_id| graph.node_sequence(node_id).map(|bytes| bytes.len()))
            .collect::<Result<Vec<_>>>()?;
        let total: usize = lengths.iter().sum();
        for (index, &node_id) in path.nodes().iter().enumerate() {
            let node = graph
                .node(node_id)
                .ok_or_else(|| Error::Invariant(format!("unregistered node {node_id}")))?;
            let number = occurrences.entry(node.block).or_default();
            *number += 1;
            keys.insert(
                node_id,
                NodeKey {
                    name: path.name().to_string(),
                    number: *number,
                    strand: node.strand,
                },
            );
            if let Some(&start) = path.position().get(index) {
                let stop = if path.circular() && total > 0 {
                    (start + lengths[index]) % total
                } else {
                    start + lengths[index]
                };
                spans.insert(node_id, (start, stop));
            }
        }
    }

    let paths = graph
        .paths()
        .map(|path| PathDoc {
            name: path.name().to_string(),
            offset: path.circular().then_some(path.offset()),
            circular: path.circular(),
            position: path.position().to_vec(),
            blocks: path
                .nodes()
                .iter()
                .map(|node_id| {
                    let key = &keys[node_id];
                    NodeDoc {
                        id: graph.node(*node_id).expect("walked above").block.to_string(),
                        name: key.name.clone(),
                        number: key.number,
                        strand: key.strand,
                    }
                })
                .collect(),
        })
        .collect();

    let mut blocks = Vec::new();
    for id in graph.block_ids() {
        let block = graph.block(id).expect("listed id");
        let mut nodes: Vec<NodeId> = block.node_ids();
        nodes.sort_by_key(|node_id| keys[node_id].clone());

        let mut mutate = Vec::new();
        let mut insert = Vec::new();
        let mut delete = Vec::new();
        let mut positions: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for node_id in nodes {
            let key = keys[&node_id].clone();
            mutate.push((
                key.clone(),
                block
                    .substitutions_of(node_id)
                    .expect("listed node")
                    .iter()
                    .map(|(&at, &base)| (at, (base as char).to_string()))
                    .collect(),
            ));
            insert.push((
                key.clone(),
                block
                    .insertions_of(node_id)
                    .expect("listed node")
                    .iter()
                    .map(|(&at, sequence)| {
                        (at, String::from_utf8_lossy(sequence).into_owned())
                    })
                    .collect(),
            ));
            delete.push((
                key.clone(),
                block
                    .deletions_of(node_id)
                    .expect("listed node")
                    .iter()
                    .map(|(&at, &length)| (at, length))
                    .collect(),
            ));
            if let Some(&span) = spans.get(&node_id) {
                positions.insert(key.strip(), span);
            }
        }

        blocks.push(BlockDoc {
            id: id.to_string(),
            sequence: String::from_utf8_lossy(block.consensus()).into_owned(),
            gaps: block
                .gaps()
                .iter()
                .map(|(&anchor, &width)| (anchor.to_string(), width))
                .collect(),
            mutate,
            insert,
            delete,
            positions: (!positions.is_empty()).then_some(positions),
        });
    }

    Ok(GraphDoc { paths, blocks })
}

fn unmarshal(document: GraphDoc) -> Result<Graph> {
    let mut graph = Graph::new();

    // First pass: rebuild paths and nodes, and record which wire key claims
    // which node of which block.
    let mut claims: HashMap<(BlockId, NodeKey), NodeId> = HashMap::new();
    for path_doc in document.paths {
        if graph.paths.contains_key(&path_doc.name) {
            return Err(Error::DuplicatePathName(path_doc.name));
        }
        let mut nodes = Vec::with_capacity(path_doc.blocks.len());
        for node_doc in path_doc.blocks {
            let block_id: BlockId = node_doc
                .id
                .parse()
                .map_err(|_| Error::UnknownBlock(node_doc.id.clone()))?;
            let node_id = NodeId::random();
            graph
                .nodes
                .insert(node_id, Node::new(block_id, node_doc.strand));
            claims.insert(
                (
                    block_id,
                    NodeKey {
                        name: node_doc.name,
                        number: node_doc.number,
                        strand: node_doc.strand,
                    },
                ),
                node_id,
            );
            nodes.push(node_id);
        }
        let mut path = Path::with_offset(
            path_doc.name.clone(),
            nodes,
            path_doc.circular,
            path_doc.offset.unwrap_or(0),
        );
        path.set_position(path_doc.position);
        graph.paths.insert(path_doc.name, path);
    }

    // Second pass: rebuild blocks, resolving every wire key to its node.
    for block_doc in document.blocks {
        let block_id: BlockId = block_doc
            .id
            .parse()
            .map_err(|_| Error::UnknownBlock(block_doc.id.clone()))?;
        let resolve = |key: &NodeKey| {
            claims
                .get(&(block_id, key.clone()))
                .copied()
                .ok_or_else(|| Error::UnclaimedNode {
                    block: block_doc.id.clone(),
                    name: key.name.clone(),
                    number: key.number,
                })
        };

        let mut gaps = BTreeMap::new();
        for (anchor, width) in block_doc.gaps {
            let anchor: usize = anchor.parse().map_err(|_| Error::Invariant(
                format!("block {block_id}: non-numeric gap key {anchor}"),
            ))?;
            gaps.insert(anchor, width);
        }

        let mut substitutions = HashMap::new();
        let mut insertions = HashMap::new();
        let mut deletions = HashMap::new();
        for (key, entries) in block_doc.mutate {
            let node = resolve(&key)?;
            let map = entries
                .into_iter()
                .map(|(at, base)| (at, base.bytes().next().unwrap_or(b'N')))
                .collect();
            substitutions.insert(node, map);
        }
        for (key, entries) in block_doc.insert {
            let node = resolve(&key)?;
            let map = entries
                .into_iter()
                .map(|(at, sequence)| (at, sequence.into_bytes()))
                .collect();
            insertions.insert(node, map);
        }
        for (key, entries) in block_doc.delete {
            let node = resolve(&key)?;
            deletions.insert(node, entries.into_iter().collect());
        }

        let mut block = Block::from_parts(
            block_id,
            block_doc.sequence.into_bytes(),
            gaps,
            substitutions,
            insertions,
            deletions,
        );
        // Every node a path claims must be keyed, even when the document
        // lists no alleles for it.
        for ((owner, _), node_id) in &claims {
            if *owner == block_id {
                block.add_node(*node_id);
            }
        }
        graph.blocks.insert(block_id, block);
    }

    for node in graph.nodes.values() {
        if !graph.blocks.contains_key(&node.block) {
            return Err(Error::UnknownBlock(node.block.to_string()));
        }
    }
    debug!(
        "read graph with {} blocks and {} paths",
        graph.blocks.len(),
        graph.paths.len()
    );
    Ok(graph)
}
