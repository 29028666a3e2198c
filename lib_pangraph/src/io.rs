//! Reading and writing graphs: FASTA input and consensus output, the
//! canonical JSON document, and GFA 1.0 export.

pub mod fasta;
pub mod gfa;
pub mod json;
