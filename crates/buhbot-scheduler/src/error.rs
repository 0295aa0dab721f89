use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided job payload failed to (de)serialize.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No job with the given ID exists in the store.
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// A handler is not registered for the given queue.
    #[error("no handler registered for queue: {0}")]
    NoHandler(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
