//! The contract with the external pairwise aligner.

use serde::{Deserialize, Serialize};

use crate::node::Strand;

pub mod cigar;


pub use cigar::{Cigar, CigarOp};

/// Alignments shorter than this are never consumed.
pub const MIN_ALIGNMENT_LENGTH: usize = 100;

/// One aligned interval of a sequence, as reported by the aligner.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub name: String,
    #[serde(rename = "len")]
    pub length: usize,
    pub start: usize,
    pub stop: usize,
}

impl Hit {
    /// The number of block ends this hit would cut open.
    fn cuts(&self) -> usize {
        usize::from(self.start > 0) + usize::from(self.stop < self.length)
    }
}

/// A pairwise alignment between two block consensi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub qry: Hit,
    #[serde(rename = "ref")]
    pub reference: Hit,
    pub matches: usize,
    pub length: usize,
    pub quality: usize,
    pub strand: Strand,
    pub cigar: Cigar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// The default merge-worthiness score: negative is worth merging. Penalizes
/// every block end the alignment cuts open and every mismatch; alignments
/// shorter than [`MIN_ALIGNMENT_LENGTH`] are rejected outright.
pub fn default_energy(alignment: &Alignment) -> f64 {
    if alignment.length < MIN_ALIGNMENT_LENGTH {
        return f64::INFINITY;
    }
    let cuts = alignment.qry.cuts() + alignment.reference.cuts();
    let mismatches = alignment.length.saturating_sub(alignment.matches);
    -(alignment.length as f64) + 100.0 * cuts as f64 + 20.0 * mismatches as f64
}
