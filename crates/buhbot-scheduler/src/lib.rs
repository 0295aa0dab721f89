//! Delay-based job queue: named queues, per-queue concurrency and token-bucket
//! rate limiting, SQLite-persisted so a restart never loses a pending timer.
//!
//! | module       | owns                                                  |
//! |--------------|--------------------------------------------------------|
//! | `db`         | schema init, in-memory test helper                    |
//! | `types`      | `Job`, `QueueName`, `Backoff`, enqueue options         |
//! | `rate_limit` | the token-bucket limiter backing per-queue rate limits |
//! | `engine`     | `SchedulerEngine`, `JobHandler`, poll/drain loop       |
//!
//! Four logical queues exist: `sla-timer` (breach/warning firings),
//! `alert-dispatch` (notification fan-out), `survey` and `retention` (both
//! out of core — accepted but unhandled).

pub mod db;
pub mod engine;
pub mod error;
pub mod rate_limit;
pub mod types;

pub use engine::{JobHandler, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use types::{Backoff, EnqueueOptions, Job, JobStatus, QueueName};
