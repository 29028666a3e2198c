//! Polish: re-derive a block's internal alignment with an external MSA tool.

use std::io::Write;
use std::process::{Command, Stdio};

use log::{debug, warn};
use rayon::prelude::*;
use tempfile::NamedTempFile;

use crate::block::{Block, BlockId};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::io::fasta;
use crate::node::NodeId;


/// The external multiple-sequence-alignment invocation.
#[derive(Debug, Clone)]
pub struct Msa {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for Msa {
    fn default() -> Self {
        Self {
            command: "mafft".into(),
            args: vec!["--auto".into(), "--quiet".into()],
        }
    }
}

impl Msa {
    /// Align the given sequences, returning one gapped row per input row.
    fn align(&self, rows: &[(NodeId, Vec<u8>)]) -> Result<Vec<(NodeId, Vec<u8>)>> {
        let mut input = NamedTempFile::new()?;
        for (node, bytes) in rows {
            writeln!(input, ">{node}")?;
            input.write_all(bytes)?;
            writeln!(input)?;
        }
        input.flush()?;

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(input.path())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::ExternalToolMissing {
                tool: self.command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::ExternalToolFailed {
                tool: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let records = fasta::read_fasta(std::io::Cursor::new(output.stdout))?;
        if records.len() != rows.len() {
            return Err(Error::ExternalToolOutput {
                tool: self.command.clone(),
                detail: format!("expected {} rows, found {}", rows.len(), records.len()),
            });
        }
        let mut aligned = Vec::with_capacity(records.len());
        for record in records {
            let node: NodeId = record.name.parse().map_err(|_| Error::ExternalToolOutput {
                tool: self.command.clone(),
                detail: format!("unrecognized record name {}", record.name),
            })?;
            aligned.push((node, record.sequence));
        }
        Ok(aligned)
    }
}

impl Graph {
    /// Re-align every accepted block of depth at least two with the external
    /// MSA tool and rebuild its consensus and allele maps from the result.
    ///
    /// Blocks are aligned in parallel; each worker owns its block's rows
    /// exclusively, and all graph mutation happens afterwards on the calling
    /// thread. Successful rebuilds are kept even when another block fails;
    /// the first failure is then returned.
    pub fn realign(&mut self, msa: &Msa, accept: impl Fn(&Block) -> bool + Sync) -> Result<usize> {
        let targets: Vec<BlockId> = self
            .block_ids()
            .into_iter()
            .filter(|id| {
                let block = &self.blocks[id];
                block.depth() >= 2 && accept(block)
            })
            .collect();
        debug!("realigning {} blocks with {}", targets.len(), msa.command);

        let blocks = &self.blocks;
        let results: Vec<(BlockId, Result<Vec<(NodeId, Vec<u8>)>>)> = targets
            .par_iter()
            .map(|&id| {
                let block = &blocks[&id];
                let rows = block
                    .node_ids()
                    .into_iter()
                    .map(|node| block.materialize(node).map(|bytes| (node, bytes)))
                    .collect::<Result<Vec<_>>>();
                (id, rows.and_then(|rows| msa.align(&rows)))
            })
            .collect();

        let mut first_error = None;
        let mut applied = 0;
        for (id, result) in results {
            let outcome = result.and_then(|rows| {
                self.blocks
                    .get_mut(&id)
                    .ok_or_else(|| Error::UnknownBlock(id.to_string()))?
                    .rebuild_from_rows(&rows)
            });
            match outcome {
                Ok(()) => applied += 1,
                Err(error) => {
                    warn!("realignment of block {id} failed: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(applied),
        }
    }
}
