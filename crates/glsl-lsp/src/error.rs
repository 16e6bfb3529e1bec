//! Server error types.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while serving documents and diagnostics.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A URI that does not name a local file.
    #[error("not a file uri: {0}")]
    InvalidUri(String),

    /// The registry says the document is open but the editor never sent it.
    #[error("document {} is open but missing from the open-document table", .0.display())]
    OpenDocumentMissing(PathBuf),

    /// Reading an unopened document from disk failed.
    #[error("failed to read {}: {source}", .path.display())]
    ReadDocument {
        /// The document path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The validator process could not be started.
    #[error("failed to start validator {}: {source}", .program.display())]
    SpawnValidator {
        /// The validator executable.
        program: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Feeding or draining the validator process failed.
    #[error("validator {} I/O failed: {source}", .program.display())]
    ValidatorIo {
        /// The validator executable.
        program: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed protocol payload.
    #[error("invalid protocol payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error shared between every caller awaiting the same computation.
pub type SharedError = Arc<ServerError>;

/// Result alias for computations cached by the versioned executors.
pub type SharedResult<T> = Result<T, SharedError>;
