use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four logical queues named in §4.7. `Survey` and `Retention` are
/// accepted by the engine but have no handler wired up in this build —
/// out-of-core per the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    SlaTimer,
    AlertDispatch,
    Survey,
    Retention,
}

impl QueueName {
    pub const ALL: [QueueName; 4] =
        [QueueName::SlaTimer, QueueName::AlertDispatch, QueueName::Survey, QueueName::Retention];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::SlaTimer => "sla-timer",
            QueueName::AlertDispatch => "alert-dispatch",
            QueueName::Survey => "survey",
            QueueName::Retention => "retention",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sla-timer" => Ok(QueueName::SlaTimer),
            "alert-dispatch" => Ok(QueueName::AlertDispatch),
            "survey" => Ok(QueueName::Survey),
            "retention" => Ok(QueueName::Retention),
            other => Err(format!("unknown queue: {other}")),
        }
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Failed an attempt but will retry after backoff.
    Failed,
    /// Exhausted `attempts` — moved to the failed tail, will not retry.
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Retry delay policy applied between failed attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    pub fn delay_for_attempt(self, attempt: u32) -> std::time::Duration {
        let ms = match self {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms, max_ms } => {
                base_ms.saturating_mul(1u64 << attempt.min(20)).min(max_ms)
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { base_ms: 1_000, max_ms: 5 * 60_000 }
    }
}

/// Options accompanying an [`crate::engine::SchedulerEngine::enqueue`] call.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub delay_millis: i64,
    pub attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay_millis: 0,
            attempts: 5,
            backoff: Backoff::default(),
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

/// A persisted, delay-scheduled job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Caller-chosen ID. Re-enqueueing the same `id` replaces the pending
    /// instance (§4.7 idempotence).
    pub id: String,
    pub queue: QueueName,
    /// Opaque JSON payload forwarded to the handler.
    pub payload: String,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
