use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    Store(#[from] buhbot_store::StoreError),

    #[error(transparent)]
    Classifier(#[from] buhbot_classifier::ClassifierError),

    #[error(transparent)]
    Requests(#[from] buhbot_requests::RequestsError),

    #[error(transparent)]
    Sla(#[from] buhbot_sla::SlaError),

    #[error(transparent)]
    Scheduler(#[from] buhbot_scheduler::SchedulerError),
}

pub type Result<T> = std::result::Result<T, IngressError>;
