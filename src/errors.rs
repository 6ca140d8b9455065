//! Blob Transfer Error Definitions
//!
//! This module defines the error type shared by the upload, download and batch
//! transfer paths. Errors are categorized into configuration errors, cancellation,
//! sink errors, and failures reported by the storage service collaborator.

use thiserror::Error;

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Base error type for all transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Invalid argument or configuration was provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation observed cancellation of its token
    #[error("Operation cancelled")]
    Cancelled,

    /// The transfer manager was closed and can no longer hand out buffers
    #[error("Transfer manager is closed")]
    ManagerClosed,

    /// Client has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// A section writer was asked to write past the end of its window
    #[error("End of section reached")]
    EndOfSection,

    /// The destination accepted fewer bytes than were offered
    #[error("Short write: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the sink
        written: usize,
        /// Bytes offered to the sink
        expected: usize,
    },

    /// A chunk ID could not be decoded
    #[error("Invalid chunk ID: {0}")]
    InvalidChunkId(String),

    /// The operating system could not supply random bytes for a run ID
    #[error("Random source unavailable: {0}")]
    Randomness(String),

    /// Staging a block failed
    #[error("Failed to stage block {block_id}: {source}")]
    Stage {
        /// ID of the block that failed to stage
        block_id: String,
        /// Underlying failure reported by the block writer
        #[source]
        source: Box<TransferError>,
    },

    /// Committing the block list failed
    #[error("Failed to commit block list: {0}")]
    Commit(String),

    /// The storage service collaborator reported a failure
    #[error("Service error during {operation}: {message}")]
    Service {
        /// Operation that was being performed
        operation: String,
        /// Message reported by the service
        message: String,
    },

    /// A worker task ended without reporting a result
    #[error("Worker task failed: {0}")]
    Join(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Creates a service error for the given operation
    pub fn service(operation: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Service {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error, or the error it wraps, is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            TransferError::Cancelled => true,
            TransferError::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::Join(err.to_string())
    }
}
