//! Error types for list updates, tasks and paging.

use thiserror::Error;

/// Main error type for differ, pager and mediator operations.
///
/// Failures of the data source itself are not represented here: they are
/// carried as [`LoadError`](crate::paging::LoadError) inside
/// [`LoadState::Failure`](crate::paging::LoadState::Failure).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PagingError {
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Update was superseded by a newer list submission")]
    Superseded,

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Diff callback panicked: {0}")]
    DiffPanicked(String),

    #[error("Diff produced an inconsistent patch at position {0}")]
    InconsistentPatch(usize),

    #[error("List differ is poisoned: {0}")]
    Poisoned(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Cannot block on the owner thread while the task is pending")]
    WaitOnOwnerThread,

    #[error("Timed out waiting for task")]
    Timeout,

    #[error("Task was dropped before completing")]
    TaskDropped,

    #[error("Stream already has an active subscriber")]
    ConcurrentSubscription,

    #[error("Subscription dropped")]
    SubscriptionDropped,

    #[error("No paging source has been submitted")]
    NoUpstream,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for PagingError {
    fn from(e: std::io::Error) -> Self {
        PagingError::ThreadSpawn(e.to_string())
    }
}

/// Result type for differ, pager and mediator operations.
pub type Result<T> = std::result::Result<T, PagingError>;
