// Error types for depot operations
// Backend failures are classified so the executor can tell fatal from transient

use thiserror::Error;

/// Errors reported by the depot backend or raised while planning a sync.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Local capacity exhausted (disk full). Fatal to the worker that hits it.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// Any other backend failure. Logged and skipped.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid revision '{0}'")]
    InvalidRevision(String),

    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl DepotError {
    /// Whether this error must abort the task that received it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DepotError::Capacity(_))
    }
}

pub type Result<T> = std::result::Result<T, DepotError>;
