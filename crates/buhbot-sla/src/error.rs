use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlaError {
    #[error(transparent)]
    Store(#[from] buhbot_store::StoreError),

    #[error(transparent)]
    Scheduler(#[from] buhbot_scheduler::SchedulerError),

    #[error(transparent)]
    Requests(#[from] buhbot_requests::RequestsError),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

pub type Result<T> = std::result::Result<T, SlaError>;
