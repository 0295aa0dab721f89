use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("classifier returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("classifier response did not parse: {0}")]
    Parse(String),

    #[error("classifier request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
