//! Error types for the Courier client core.

/// Top-level error type for the client core.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Scheduler registration error (empty key, non-positive interval).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Failure inside a scheduled task body.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CourierError>;
