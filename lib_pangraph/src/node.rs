//! Nodes: directed occurrences of a block on a path.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::BlockId;

/// The orientation in which a path traverses a block.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn flip(self) -> Self {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }

    pub fn is_reverse(self) -> bool {
        self == Strand::Reverse
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

impl Serialize for Strand {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        })
    }
}

impl<'de> Deserialize<'de> for Strand {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let representation = String::deserialize(deserializer)?;
        match representation.as_str() {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            other => Err(serde::de::Error::custom(format!(
                "invalid strand: {other}"
            ))),
        }
    }
}

/// Opaque stable identity of one node. Two structurally identical occurrences
/// get distinct ids, so maps keyed by `NodeId` distinguish paralogs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

/// One directed occurrence of a block on a path.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Node {
    pub block: BlockId,
    pub strand: Strand,
}

impl Node {
    pub fn new(block: BlockId, strand: Strand) -> Self {
        Self { block, strand }
    }
}
