//! Error types shared by the dataset loader, tree grower, and model codec.

use std::path::PathBuf;

/// Everything that can go wrong while loading data, growing trees, or
/// reading/writing a persisted ensemble.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    #[error("unknown committee type {0} (expected 1, 2, or 3)")]
    UnknownCommittee(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("could not open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dataset at line {line}: {message}")]
    MalformedDataset { line: usize, message: String },

    #[error("corrupt model: {0}")]
    CorruptModel(String),
}

impl ForestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForestError::Io {
            path: path.into(),
            source,
        }
    }
}
