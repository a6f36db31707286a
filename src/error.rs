//! Error types for palin.

use thiserror::Error;

/// Shared-segment lifecycle operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOp {
    Create,
    Attach,
    Detach,
    Destroy,
}

impl std::fmt::Display for SegmentOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Main error type for palin.
#[derive(Error, Debug)]
pub enum PalinError {
    #[error("Failed to {op} shared segment '{name}': {source}")]
    Resource {
        op: SegmentOp,
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid shared segment name '{0}'")]
    SegmentName(String),

    #[error("Failed to spawn worker for slot {slot}: {message}")]
    Spawn { slot: usize, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Participant {id} is outside the lock's range of {count} participants")]
    Participant { id: usize, count: usize },

    #[error("Record index {index} is outside the table capacity of {capacity}")]
    RecordIndex { index: usize, capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process control error: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl PalinError {
    /// Build a resource error from the current `errno`.
    pub fn last_os(op: SegmentOp, name: &str) -> Self {
        Self::Resource {
            op,
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        }
    }
}

/// Result type alias for palin operations.
pub type Result<T> = std::result::Result<T, PalinError>;
