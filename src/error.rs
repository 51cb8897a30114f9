//! Error types shared across the crate.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building, loading or transforming graphs.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{}: bad magic word (not a {expected} file)", path.display())]
    BadMagic { path: PathBuf, expected: &'static str },

    #[error("{}: unsupported format version {found} (expected {expected})", path.display())]
    BadVersion { path: PathBuf, found: u32, expected: u32 },

    #[error("{}: couldn't read '{field}': file truncated", path.display())]
    Truncated { path: PathBuf, field: &'static str },

    #[error("{}: invalid {field}: {message}", path.display())]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        message: String,
    },

    #[error("kmer sizes don't match [{0} vs {1}]")]
    KmerSizeMismatch(u32, u32),

    #[error("hash table capacity exhausted; re-run with more --memory or --nkmers")]
    CapacityExhausted,

    #[error("path arena exhausted; re-run with more --memory")]
    ArenaFull,

    #[error("{0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    /// Argument error with a formatted message.
    pub fn arg(msg: impl Into<String>) -> Self {
        GraphError::InvalidArgument(msg.into())
    }
}
