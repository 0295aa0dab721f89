use buhbot_core::types::RequestStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestsError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: RequestStatus, to: RequestStatus },

    #[error("request {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] buhbot_store::StoreError),
}

pub type Result<T> = std::result::Result<T, RequestsError>;
