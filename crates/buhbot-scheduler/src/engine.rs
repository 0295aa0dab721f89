use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::rate_limit::TokenBucket;
use crate::types::{EnqueueOptions, Job, JobStatus, QueueName};

/// Implemented by subsystems that consume jobs off a named queue (C8's
/// `sla-timer` breach/warning firings, C9's `alert-dispatch` notifications).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> std::result::Result<(), String>;
}

struct QueueWorker {
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    bucket: Arc<TokenBucket>,
}

/// Delay-based job queue: named queues, per-queue concurrency and rate
/// limiting, SQLite-persisted so a restart does not lose pending timers.
pub struct SchedulerEngine {
    conn: Arc<std::sync::Mutex<Connection>>,
    workers: std::sync::RwLock<HashMap<QueueName, QueueWorker>>,
}

impl SchedulerEngine {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
            workers: std::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Registers the handler that drains `queue`, with its own worker pool
    /// size and an optional `(max, per)` rate limit. Takes `&self` (not
    /// `&mut self`) so a handler that needs to hold an `Arc<SchedulerEngine>`
    /// back to this same engine can be built and registered after the engine
    /// is already shared.
    pub fn register_handler(&self, queue: QueueName, handler: Arc<dyn JobHandler>, concurrency: usize, rate: Option<(u32, Duration)>) {
        let bucket = match rate {
            Some((max, per)) => Arc::new(TokenBucket::new(max, per)),
            None => Arc::new(TokenBucket::unlimited()),
        };
        self.workers.write().unwrap().insert(
            queue,
            QueueWorker {
                handler,
                semaphore: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                bucket,
            },
        );
    }

    /// Idempotent on `job_id`: re-enqueueing the same ID replaces the
    /// existing pending instance (§4.7).
    pub fn enqueue(&self, queue: QueueName, job_id: &str, payload: &str, opts: EnqueueOptions) -> Result<()> {
        let now = Utc::now();
        let run_at = now + chrono::Duration::milliseconds(opts.delay_millis.max(0));
        let backoff_json =
            serde_json::to_string(&opts.backoff).map_err(|e| SchedulerError::InvalidPayload(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (
                id, queue, payload, status, run_at, attempts_made, max_attempts,
                backoff, remove_on_complete, remove_on_fail, last_error, created_at, updated_at
             ) VALUES (?1,?2,?3,'pending',?4,0,?5,?6,?7,?8,NULL,?9,?9)
             ON CONFLICT(queue, id) DO UPDATE SET
                payload = excluded.payload,
                status = 'pending',
                run_at = excluded.run_at,
                attempts_made = 0,
                max_attempts = excluded.max_attempts,
                backoff = excluded.backoff,
                remove_on_complete = excluded.remove_on_complete,
                remove_on_fail = excluded.remove_on_fail,
                last_error = NULL,
                updated_at = excluded.updated_at",
            params![
                job_id,
                queue.as_str(),
                payload,
                run_at.to_rfc3339(),
                opts.attempts,
                backoff_json,
                opts.remove_on_complete,
                opts.remove_on_fail,
                now.to_rfc3339(),
            ],
        )?;
        debug!(%queue, job_id, "enqueued");
        Ok(())
    }

    /// Best-effort cancel; returns whether a row was actually removed.
    pub fn cancel(&self, queue: QueueName, job_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM jobs WHERE queue = ?1 AND id = ?2", params![queue.as_str(), job_id])?;
        Ok(n > 0)
    }

    /// Runs one poll loop per registered queue until `shutdown` broadcasts
    /// `true`, then stops picking up new jobs and waits up to `grace` for
    /// in-flight handlers to finish.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>, grace: Duration) {
        let queues: Vec<QueueName> = self.workers.read().unwrap().keys().copied().collect();
        info!(queues = queues.len(), "scheduler engine started");

        let mut loops = Vec::new();
        for queue in queues.iter().copied() {
            let engine = self.clone();
            let mut shutdown_rx = shutdown.clone();
            loops.push(tokio::spawn(async move {
                engine.poll_loop(queue, &mut shutdown_rx).await;
            }));
        }

        for handle in loops {
            let _ = handle.await;
        }

        info!("scheduler engine draining");
        let drain_targets: Vec<(QueueName, Arc<Semaphore>, usize)> = {
            let workers = self.workers.read().unwrap();
            queues.iter().filter_map(|q| workers.get(q).map(|w| (*q, w.semaphore.clone(), w.concurrency))).collect()
        };
        for (queue, semaphore, concurrency) in drain_targets {
            let deadline = tokio::time::Instant::now() + grace;
            match tokio::time::timeout_at(deadline, semaphore.acquire_many(concurrency as u32)).await {
                Ok(Ok(_permit)) => debug!(%queue, "queue drained cleanly"),
                _ => warn!(%queue, "grace window elapsed with jobs still in flight"),
            }
        }
        info!("scheduler engine stopped");
    }

    async fn poll_loop(&self, queue: QueueName, shutdown: &mut watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.poll_once(queue) {
                        error!(%queue, error = %err, "poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    fn poll_once(&self, queue: QueueName) -> Result<()> {
        let (handler, semaphore, bucket) = {
            let workers = self.workers.read().unwrap();
            let Some(worker) = workers.get(&queue) else {
                return Ok(());
            };
            if worker.semaphore.available_permits() == 0 {
                return Ok(());
            }
            (worker.handler.clone(), worker.semaphore.clone(), worker.bucket.clone())
        };

        let due = self.fetch_due(queue)?;
        for job in due {
            if semaphore.available_permits() == 0 {
                break;
            }
            if !bucket.try_acquire() {
                break;
            }
            self.mark_running(queue, &job.id)?;

            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let handler = handler.clone();
            let conn = self.conn.clone();
            let job = job.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = handler.handle(&job).await;
                if let Err(err) = finish_job(&conn, &job, outcome) {
                    error!(job_id = %job.id, error = %err, "failed to record job outcome");
                }
            });
        }
        Ok(())
    }

    fn fetch_due(&self, queue: QueueName) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT id, queue, payload, status, run_at, attempts_made, max_attempts,
                    backoff, remove_on_complete, remove_on_fail, last_error, created_at, updated_at
             FROM jobs WHERE queue = ?1 AND status = 'pending' AND run_at <= ?2
             ORDER BY run_at ASC",
        )?;
        let rows = stmt.query_map(params![queue.as_str(), now], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn mark_running(&self, queue: QueueName, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?1 WHERE queue = ?2 AND id = ?3",
            params![Utc::now().to_rfc3339(), queue.as_str(), job_id],
        )?;
        Ok(())
    }
}

fn finish_job(
    conn: &Arc<std::sync::Mutex<Connection>>,
    job: &Job,
    outcome: std::result::Result<(), String>,
) -> Result<()> {
    let conn = conn.lock().unwrap();
    let now = Utc::now();

    match outcome {
        Ok(()) => {
            if job.remove_on_complete {
                conn.execute("DELETE FROM jobs WHERE queue = ?1 AND id = ?2", params![job.queue.as_str(), job.id])?;
            } else {
                conn.execute(
                    "UPDATE jobs SET status = 'completed', updated_at = ?1 WHERE queue = ?2 AND id = ?3",
                    params![now.to_rfc3339(), job.queue.as_str(), job.id],
                )?;
            }
        }
        Err(message) => {
            let attempts_made = job.attempts_made + 1;
            if attempts_made >= job.max_attempts {
                if job.remove_on_fail {
                    conn.execute("DELETE FROM jobs WHERE queue = ?1 AND id = ?2", params![job.queue.as_str(), job.id])?;
                } else {
                    conn.execute(
                        "UPDATE jobs SET status = 'dead', attempts_made = ?1, last_error = ?2, updated_at = ?3
                         WHERE queue = ?4 AND id = ?5",
                        params![attempts_made, message, now.to_rfc3339(), job.queue.as_str(), job.id],
                    )?;
                }
            } else {
                let delay = job.backoff.delay_for_attempt(attempts_made);
                let run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                conn.execute(
                    "UPDATE jobs SET status = 'pending', attempts_made = ?1, run_at = ?2, last_error = ?3, updated_at = ?4
                     WHERE queue = ?5 AND id = ?6",
                    params![attempts_made, run_at.to_rfc3339(), message, now.to_rfc3339(), job.queue.as_str(), job.id],
                )?;
            }
        }
    }
    Ok(())
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let queue_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let run_at_str: String = row.get(4)?;
    let backoff_json: String = row.get(7)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    Ok(Job {
        id: row.get(0)?,
        queue: queue_str.parse::<QueueName>().unwrap_or(QueueName::SlaTimer),
        payload: row.get(2)?,
        status: status_str.parse::<JobStatus>().unwrap_or(JobStatus::Pending),
        run_at: chrono::DateTime::parse_from_rfc3339(&run_at_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        attempts_made: row.get(5)?,
        max_attempts: row.get(6)?,
        backoff: serde_json::from_str(&backoff_json).unwrap_or_default(),
        remove_on_complete: row.get(8)?,
        remove_on_fail: row.get(9)?,
        last_error: row.get(10)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn enqueue_with_same_id_replaces_pending_instance() {
        let engine = SchedulerEngine::new(open_test_db()).unwrap();
        engine.enqueue(QueueName::SlaTimer, "timer:req-1", "{}", EnqueueOptions::default()).unwrap();
        engine
            .enqueue(QueueName::SlaTimer, "timer:req-1", "{\"v\":2}", EnqueueOptions::default())
            .unwrap();

        let due = engine.fetch_due(QueueName::SlaTimer).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload, "{\"v\":2}");
    }

    #[test]
    fn cancel_returns_false_for_unknown_job() {
        let engine = SchedulerEngine::new(open_test_db()).unwrap();
        assert!(!engine.cancel(QueueName::SlaTimer, "nope").unwrap());
    }

    #[tokio::test]
    async fn due_job_is_executed_by_handler() {
        let engine = SchedulerEngine::new(open_test_db()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.register_handler(QueueName::SlaTimer, Arc::new(CountingHandler { calls: calls.clone() }), 2, None);
        engine
            .enqueue(QueueName::SlaTimer, "timer:req-1", "{}", EnqueueOptions { delay_millis: 0, ..Default::default() })
            .unwrap();

        engine.poll_once(QueueName::SlaTimer).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
