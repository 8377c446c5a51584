//! Error types for ipxdb.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for ipxdb operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file could not be opened
    #[error("open source file `{path}`: {source}")]
    SrcOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Destination file could not be opened
    #[error("open target file `{path}`: {source}")]
    DstOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed line in a text range file, with surrounding context
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid IPv4 address text
    #[error("invalid IPv4 address: `{0}`")]
    InvalidIp(String),

    /// Segment literal does not split into start|end|region
    #[error("invalid ip segment `{0}`")]
    InvalidSegment(String),

    /// Start IP greater than end IP
    #[error("start ip ({start}) should not be greater than end ip ({end})")]
    RangeInverted { start: String, end: String },

    /// Empty region field
    #[error("empty region info")]
    EmptyRegion,

    /// Two consecutive segments are not contiguous
    #[error("discontinuous segment: expected start ip {expected}, got {actual}")]
    Discontiguous { expected: String, actual: String },

    /// Region byte length exceeds the u16 record limit
    #[error("region info too long: {0} bytes, limit is 65535")]
    RegionTooLong(usize),

    /// Unsupported xdb format version
    #[error("unsupported xdb version: {0}")]
    UnsupportedVersion(u16),

    /// Unsupported index policy code
    #[error("unsupported index policy: {0}")]
    UnsupportedIndexPolicy(u16),

    /// Unsupported searcher loader mode name
    #[error("unsupported search mode: {0}")]
    UnsupportedSearchMode(String),

    /// File shorter than the fixed header + vector index regions
    #[error("truncated xdb file: {actual} bytes, need at least {expected}")]
    TruncatedFile { expected: u64, actual: u64 },

    /// Offsets or lengths inside the xdb point outside valid regions
    #[error("corrupt xdb: {0}")]
    CorruptXdb(String),

    /// Editor overwrite found no segment containing the new start IP
    #[error("no segment contains start ip {0}")]
    NoContainingSegment(String),

    /// Source range list is empty
    #[error("empty segment list")]
    EmptyInput,

    /// Operation on a disposed handle
    #[error("operation on a closed handle")]
    Closed,

    /// Cooperative cancellation observed
    #[error("task cancelled")]
    Cancelled,

    /// Build exceeded its deadline
    #[error("build deadline exceeded")]
    DeadlineExceeded,
}

/// Result type alias for ipxdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A rejected line in a text range file.
///
/// Carries the offending line, its 1-based number, the underlying
/// validation failure, and up to three lines of context on each side.
#[derive(Debug)]
pub struct ParseError {
    /// 1-based line number of the offending line.
    pub line_number: usize,
    /// The offending line, trimmed.
    pub line: String,
    /// The validation failure that rejected the line.
    pub cause: Box<Error>,
    /// Up to three preceding lines as `(line_number, text)`.
    pub before: Vec<(usize, String)>,
    /// Up to three following lines as `(line_number, text)`.
    pub after: Vec<(usize, String)>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "line {}: {}", self.line_number, self.cause)?;
        for (n, text) in &self.before {
            writeln!(f, "     {} | {}", n, text)?;
        }
        writeln!(f, "  >> {} | {}", self.line_number, self.line)?;
        for (n, text) in &self.after {
            writeln!(f, "     {} | {}", n, text)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}
