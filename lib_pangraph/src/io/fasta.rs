//! Multi-record FASTA input (optionally gzipped) and consensus output.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use flate2::bufread::MultiGzDecoder;
use log::debug;
use utf8_chars::BufReadCharsExt;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::sequence;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FastaRecord {
    pub name: String,
    pub sequence: Vec<u8>,
}

/// Read all records of a FASTA file. Gzipped input is detected by its magic
/// bytes. Duplicate record names are fatal.
pub fn read_fasta_file(path: impl AsRef<std::path::Path>) -> Result<Vec<FastaRecord>> {
    let path = path.as_ref();
    debug!("parsing fasta file {path:?}");
    let mut reader = BufReader::new(File::open(path)?);
    if reader.fill_buf()?.starts_with(&[0x1f, 0x8b]) {
        read_fasta(BufReader::new(MultiGzDecoder::new(reader)))
    } else {
        read_fasta(reader)
    }
}

/// Read all records from a FASTA stream.
pub fn read_fasta(mut reader: impl BufRead) -> Result<Vec<FastaRecord>> {
    enum State {
        FileStart,
        ParseName,
        ParseComment,
        ParseSequence,
    }

    let mut state = State::FileStart;
    let mut records: Vec<FastaRecord> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut name = String::new();
    let mut bytes: Vec<u8> = Vec::new();
    let mut at_line_start = true;

    let mut finish = |name: &mut String,
                      bytes: &mut Vec<u8>,
                      records: &mut Vec<FastaRecord>,
                      seen: &mut HashSet<String>|
     -> Result<()> {
        let name = std::mem::take(name);
        let mut sequence = std::mem::take(bytes);
        if !seen.insert(name.clone()) {
            return Err(Error::DuplicateRecordName(name));
        }
        sequence::normalize(&mut sequence);
        records.push(FastaRecord { name, sequence });
        Ok(())
    };

    for character in reader.chars() {
        let character = character?;
        let is_newline = character == '\n' || character == '\r';
        match state {
            State::FileStart => {
                if character == '>' && at_line_start {
                    state = State::ParseName;
                } else if !character.is_whitespace() {
                    return Err(Error::Parser {
                        input: character.to_string(),
                        kind: nom::error::ErrorKind::Char,
                    });
                }
            }
            State::ParseName => {
                if is_newline {
                    state = State::ParseSequence;
                } else if character.is_whitespace() {
                    state = State::ParseComment;
                } else {
                    name.push(character);
                }
            }
            State::ParseComment => {
                if is_newline {
                    state = State::ParseSequence;
                }
            }
            State::ParseSequence => {
                if character == '>' && at_line_start {
                    finish(&mut name, &mut bytes, &mut records, &mut seen)?;
                    state = State::ParseName;
                } else if !character.is_whitespace() {
                    if !character.is_ascii() {
                        return Err(Error::Parser {
                            input: character.to_string(),
                            kind: nom::error::ErrorKind::Char,
                        });
                    }
                    bytes.push(character as u8);
                }
            }
        }
        at_line_start = is_newline;
    }

    match state {
        State::FileStart => {}
        State::ParseName | State::ParseComment | State::ParseSequence => {
            finish(&mut name, &mut bytes, &mut records, &mut seen)?;
        }
    }
    debug!("parsed {} fasta records", records.len());
    Ok(records)
}

/// Write every block consensus as one FASTA record keyed by its id, in
/// sorted id order, 80 columns per line.
pub fn write_consensus_fasta(graph: &Graph, mut writer: impl Write) -> Result<()> {
    for id in graph.block_ids() {
        let block = graph.block(id).expect("listed id");
        writeln!(writer, ">{id}")?;
        for line in block.consensus().chunks(80) {
            writer.write_all(line)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
