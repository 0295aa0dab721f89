use thiserror::Error;

/// Top-level error type shared by the core types, config, and clock modules.
///
/// Subsystem crates (`buhbot-store`, `buhbot-scheduler`, ...) define their own
/// error enums and convert into this one only at the boundary the gateway binary
/// owns, matching the teacher's one-error-enum-per-crate convention.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid working schedule: {0}")]
    InvalidSchedule(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Short error code, used in structured log fields and admin-surface responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
