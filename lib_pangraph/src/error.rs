use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("An IO error occurred: {0}.")]
    Io(#[from] std::io::Error),

    #[error("A JSON error occurred: {0}.")]
    Json(#[from] serde_json::Error),

    #[error("A parsing error occurred on string '{input}': {kind:?}.")]
    Parser {
        input: String,
        kind: nom::error::ErrorKind,
    },

    #[error("Parsing was unsuccessful due to incomplete input: {0:?}.")]
    ParserIncomplete(nom::Needed),

    #[error("The record name {0} was encountered twice.")]
    DuplicateRecordName(String),

    #[error("The path name {0} was encountered twice.")]
    DuplicatePathName(String),

    #[error("The graph contains no block with id {0}.")]
    UnknownBlock(String),

    #[error("The graph contains no path named {0}.")]
    UnknownPath(String),

    #[error("Block {block} carries no alleles for node {node}.")]
    UnknownNode { block: String, node: String },

    #[error("A graph document referenced node {name}#{number} of block {block}, but no path traverses it.")]
    UnclaimedNode {
        block: String,
        name: String,
        number: usize,
    },

    #[error("An invariant was violated: {0}. This indicates a defect, not recoverable input.")]
    Invariant(String),

    #[error("The alignment between {qry} and {reference} is malformed: {detail}.")]
    MalformedAlignment {
        qry: String,
        reference: String,
        detail: String,
    },

    #[error("The CIGAR operation '{0}' is not supported.")]
    UnsupportedCigarOp(char),

    #[error("Reached an unsupported case: {0}.")]
    Unsupported(String),

    #[error("The external tool {tool} could not be invoked: {source}.")]
    ExternalToolMissing {
        tool: String,
        source: std::io::Error,
    },

    #[error("The external tool {tool} failed with {status}: {stderr}.")]
    ExternalToolFailed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("The external tool {tool} produced malformed output: {detail}.")]
    ExternalToolOutput { tool: String, detail: String },
}

pub fn translate_nom_error(error: nom::Err<nom::error::Error<&str>>) -> Error {
    match error {
        nom::Err::Incomplete(needed) => Error::ParserIncomplete(needed),
        nom::Err::Error(error) | nom::Err::Failure(error) => Error::Parser {
            input: error.input.to_string(),
            kind: error.code,
        },
    }
}
