//! The CIGAR grammar shared with the external aligner.
//!
//! Only M, I and D are meaningful to the merge; every other operation the
//! grammar recognizes (clips, skips, pads) is rejected as unsupported rather
//! than silently degraded.

use std::fmt::Display;
use std::str::FromStr;

use nom::{
    IResult, Parser,
    character::complete::{anychar, digit1},
    combinator::map_res,
    multi::many1,
    sequence::pair,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, translate_nom_error};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
}

impl CigarOp {
    pub fn consumes_query(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Insertion)
    }

    pub fn consumes_reference(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Deletion)
    }
}

impl Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CigarOp::Match => write!(f, "M"),
            CigarOp::Insertion => write!(f, "I"),
            CigarOp::Deletion => write!(f, "D"),
        }
    }
}

impl TryFrom<char> for CigarOp {
    type Error = Error;

    fn try_from(op: char) -> Result<Self> {
        match op {
            'M' => Ok(CigarOp::Match),
            'I' => Ok(CigarOp::Insertion),
            'D' => Ok(CigarOp::Deletion),
            other => Err(Error::UnsupportedCigarOp(other)),
        }
    }
}

/// A run-length encoded alignment description.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Cigar {
    ops: Vec<(usize, CigarOp)>,
}

impl Cigar {
    pub fn new() -> Self {
        Default::default()
    }

    /// Append a run, merging with the trailing run of the same operation.
    pub fn push(&mut self, count: usize, op: CigarOp) {
        if count == 0 {
            return;
        }
        match self.ops.last_mut() {
            Some((last_count, last_op)) if *last_op == op => *last_count += count,
            _ => self.ops.push((count, op)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, CigarOp)> + '_ {
        self.ops.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn query_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|(_, op)| op.consumes_query())
            .map(|(count, _)| count)
            .sum()
    }

    pub fn reference_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|(_, op)| op.consumes_reference())
            .map(|(count, _)| count)
            .sum()
    }
}

impl FromIterator<(usize, CigarOp)> for Cigar {
    fn from_iter<T: IntoIterator<Item = (usize, CigarOp)>>(iter: T) -> Self {
        let mut cigar = Cigar::new();
        for (count, op) in iter {
            cigar.push(count, op);
        }
        cigar
    }
}

fn parse_run(input: &str) -> IResult<&str, (usize, char)> {
    pair(map_res(digit1, str::parse::<usize>), anychar).parse(input)
}

fn parse_runs(input: &str) -> IResult<&str, Vec<(usize, char)>> {
    many1(parse_run).parse(input)
}

impl FromStr for Cigar {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (rest, runs) = parse_runs(s).map_err(translate_nom_error)?;
        if !rest.is_empty() {
            return Err(Error::Parser {
                input: rest.to_string(),
                kind: nom::error::ErrorKind::Eof,
            });
        }
        runs.into_iter()
            .map(|(count, op)| CigarOp::try_from(op).map(|op| (count, op)))
            .collect()
    }
}

impl Display for Cigar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (count, op) in &self.ops {
            write!(f, "{count}{op}")?;
        }
        Ok(())
    }
}

impl Serialize for Cigar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cigar {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let representation = String::deserialize(deserializer)?;
        representation.parse().map_err(serde::de::Error::custom)
    }
}
