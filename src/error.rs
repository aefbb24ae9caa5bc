//! Error taxonomy shared by every stage of a run.
//!
//! All variants are fatal to the current run: the clustering core never retries
//! locally, and a failure in any single EP trial aborts the whole EP stage.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GsError>;

#[derive(Debug, Error)]
pub enum GsError {
    /// The matrix (or a tree text) is malformed: non-square, asymmetric,
    /// non-finite, empty, or not parseable.
    #[error("invalid input: {0}")]
    InputFormat(String),

    /// A cluster of two or more leaves could not be split into two nonempty
    /// groups even after the balanced fallback.
    #[error("cluster of {size} leaves could not be bipartitioned")]
    DegenerateInput { size: usize },

    /// A caller supplied an argument outside its domain (e.g. a negative trial count).
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl GsError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        GsError::InputFormat(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GsError::Io { path: path.into(), source }
    }
}
