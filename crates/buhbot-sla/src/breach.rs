use std::sync::Arc;

use async_trait::async_trait;
use buhbot_core::types::{Alert, AlertId, AlertType, AuditContext, RequestId};
use buhbot_scheduler::{EnqueueOptions, Job, JobHandler, QueueName, SchedulerEngine};
use buhbot_settings::ConfigResolver;
use buhbot_store::audit::RequestPatch;
use buhbot_store::Db;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::timer::{timer_job_id, warn_job_id, TimerPayload};

/// §4.9 job handler for `sla-timer`, shared by the warning and breach
/// firings — they differ only in `AlertType` and whether they re-arm the
/// next escalation level.
pub struct EscalationHandler {
    db: Db,
    scheduler: Arc<SchedulerEngine>,
    resolver: Arc<ConfigResolver>,
    alert_type: AlertType,
}

impl EscalationHandler {
    pub fn breach(db: Db, scheduler: Arc<SchedulerEngine>, resolver: Arc<ConfigResolver>) -> Self {
        Self { db, scheduler, resolver, alert_type: AlertType::Breach }
    }

    pub fn warning(db: Db, scheduler: Arc<SchedulerEngine>, resolver: Arc<ConfigResolver>) -> Self {
        Self { db, scheduler, resolver, alert_type: AlertType::Warning }
    }

    fn job_id(&self, request_id: RequestId) -> String {
        match self.alert_type {
            AlertType::Breach => timer_job_id(request_id),
            AlertType::Warning => warn_job_id(request_id),
        }
    }

    fn run(&self, job: &Job) -> Result<(), String> {
        let payload: TimerPayload = serde_json::from_str(&job.payload).map_err(|e| e.to_string())?;
        let request_id = Uuid::parse_str(&payload.request_id)
            .map(RequestId)
            .map_err(|e| e.to_string())?;

        // Step 1: load the Request, drop silently if gone.
        let Some(request) = buhbot_store::requests::find_request(&self.db, request_id).map_err(|e| e.to_string())? else {
            debug!(%request_id, "escalation job fired for a request that no longer exists, dropping");
            return Ok(());
        };

        // Step 2: already answered/closed, nothing to escalate.
        if !request.status.is_claimable() {
            debug!(%request_id, status = ?request.status, "request no longer claimable, dropping escalation job");
            return Ok(());
        }

        // Step 2b: warnings disabled after this job was already queued; a
        // stale `warn:<id>` firing must not record an alert either.
        if matches!(self.alert_type, AlertType::Warning) && self.resolver.sla_warning_percent() == 0 {
            debug!(%request_id, "slaWarningPercent is 0, dropping stale warning job");
            return Ok(());
        }

        let chat_id = buhbot_core::types::ChatId(payload.chat_id);
        let Some(chat) = buhbot_store::chats::find_chat(&self.db, chat_id).map_err(|e| e.to_string())? else {
            warn!(%request_id, "chat missing for escalation job, dropping");
            return Ok(());
        };

        let schedule = crate::timer::resolve_schedule(&self.db, &chat).map_err(|e| e.to_string())?;
        let now = Utc::now();

        let effective_threshold = match self.alert_type {
            AlertType::Breach => payload.threshold_minutes,
            AlertType::Warning => {
                let percent = self.resolver.sla_warning_percent() as u32;
                payload.threshold_minutes * percent / 100
            }
        };

        let elapsed = schedule.working_minutes_between(request.received_at, now);

        // Step 3: schedule changed under us and we fired early; re-arm and bail.
        if elapsed < effective_threshold as i64 {
            let delay_ms = schedule.delay_until_breach(request.received_at, effective_threshold, now);
            self.scheduler
                .enqueue(QueueName::SlaTimer, &self.job_id(request_id), &job.payload, EnqueueOptions { delay_millis: delay_ms, ..Default::default() })
                .map_err(|e| e.to_string())?;
            debug!(%request_id, elapsed, effective_threshold, "fired before threshold reached, re-armed");
            return Ok(());
        }

        // Step 4: resolve recipients at the next escalation level.
        let accountants: Vec<String> = if !chat.accountant_usernames.is_empty() {
            chat.accountant_usernames.clone()
        } else {
            chat.accountant_telegram_ids.iter().map(|id| id.0.to_string()).collect()
        };
        let managers: Vec<String> = chat
            .manager_telegram_ids
            .iter()
            .chain(self.resolver.global_manager_telegram_ids().iter())
            .map(|id| id.0.to_string())
            .collect();
        let (recipients, source) = self.resolver.recipients_by_level(&managers, &accountants, payload.level);

        // Step 5: dedup-safe alert insert.
        let alert = Alert {
            id: AlertId::new(),
            request_id,
            alert_type: self.alert_type,
            level: payload.level,
            minutes_elapsed: elapsed,
            alert_sent_at: now,
            recipients: recipients.clone(),
            resolved_action: None,
            resolution_notes: None,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        let inserted = buhbot_store::alerts::insert_alert_if_absent(&self.db, &alert).map_err(|e| e.to_string())?;
        if !inserted {
            debug!(%request_id, level = payload.level, alert_type = %self.alert_type, "alert already recorded for this (request, level, type), skipping duplicate");
        }
        info!(%request_id, level = payload.level, source = %source, recipients = recipients.len(), "escalation fired");

        // Step 6: one dispatch job per recipient, deterministic ids make retries idempotent.
        for recipient in &recipients {
            let job_id = format!("alert:{request_id}:{}:{}:{recipient}", self.alert_type, payload.level);
            let dispatch_payload = serde_json::json!({
                "request_id": request_id.to_string(),
                "chat_id": chat.id.0,
                "alert_type": self.alert_type.to_string(),
                "level": payload.level,
                "recipient": recipient,
            })
            .to_string();
            if let Err(err) = self.scheduler.enqueue(QueueName::AlertDispatch, &job_id, &dispatch_payload, EnqueueOptions::default()) {
                warn!(%request_id, %err, "failed to enqueue alert dispatch job");
            }
        }

        // Step 7: only breaches flip the flag; warnings are advisory.
        if matches!(self.alert_type, AlertType::Breach) {
            let patch = RequestPatch { sla_breached: Some(true), ..Default::default() };
            buhbot_store::audit::update_request_with_audit(&self.db, request_id, &patch, &AuditContext::system("sla breach escalation"))
                .map_err(|e| e.to_string())?;
        }

        // Step 8: re-arm the next level, breach chain only — warnings fire once.
        if matches!(self.alert_type, AlertType::Breach) && payload.level < self.resolver.max_escalations() {
            let interval = self.resolver.escalation_interval_minutes();
            let delay_ms = schedule.delay_until_breach(now, interval, now);
            let next_payload = TimerPayload {
                request_id: request_id.to_string(),
                chat_id: chat.id.0,
                threshold_minutes: payload.threshold_minutes,
                level: payload.level + 1,
            };
            let next_json = serde_json::to_string(&next_payload).map_err(|e| e.to_string())?;
            self.scheduler
                .enqueue(QueueName::SlaTimer, &timer_job_id(request_id), &next_json, EnqueueOptions { delay_millis: delay_ms, ..Default::default() })
                .map_err(|e| e.to_string())?;
        }

        // Step 9: in-chat notice is itself just another dispatch job.
        if matches!(self.alert_type, AlertType::Breach) && chat.notify_in_chat_on_breach {
            let job_id = format!("chat-notify:{request_id}:{}", payload.level);
            let notify_payload = serde_json::json!({
                "request_id": request_id.to_string(),
                "chat_id": chat.id.0,
                "level": payload.level,
            })
            .to_string();
            if let Err(err) = self.scheduler.enqueue(QueueName::AlertDispatch, &job_id, &notify_payload, EnqueueOptions::default()) {
                warn!(%request_id, %err, "failed to enqueue in-chat breach notice");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobHandler for EscalationHandler {
    async fn handle(&self, job: &Job) -> std::result::Result<(), String> {
        self.run(job)
    }
}

/// `timer:<id>` and `warn:<id>` jobs share the `sla-timer` queue (so a single
/// re-enqueue of either supersedes at most one pending job), but each needs a
/// differently-configured [`EscalationHandler`]. `SlaTimerRouter` is the one
/// handler actually registered on the queue; it dispatches by job-id prefix.
pub struct SlaTimerRouter {
    breach: EscalationHandler,
    warning: EscalationHandler,
}

impl SlaTimerRouter {
    pub fn new(db: Db, scheduler: Arc<SchedulerEngine>, resolver: Arc<ConfigResolver>) -> Self {
        Self {
            breach: EscalationHandler::breach(db.clone(), scheduler.clone(), resolver.clone()),
            warning: EscalationHandler::warning(db, scheduler, resolver),
        }
    }
}

#[async_trait]
impl JobHandler for SlaTimerRouter {
    async fn handle(&self, job: &Job) -> std::result::Result<(), String> {
        if job.id.starts_with("warn:") {
            self.warning.run(job)
        } else {
            self.breach.run(job)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_core::types::{Chat, ChatKind, Classification, Request, RequestStatus};
    use buhbot_store::db::open_test_db;
    use std::sync::Mutex;

    fn test_db() -> Db {
        Arc::new(Mutex::new(open_test_db()))
    }

    fn test_scheduler() -> Arc<SchedulerEngine> {
        Arc::new(SchedulerEngine::new(buhbot_scheduler::db::open_test_db()).unwrap())
    }

    fn always_open_chat() -> Chat {
        Chat {
            id: buhbot_core::types::ChatId(1),
            title: None,
            kind: ChatKind::Group,
            monitoring_enabled: true,
            sla_enabled: true,
            notify_in_chat_on_breach: true,
            is_24x7_mode: true,
            sla_threshold_minutes: None,
            client_tier: None,
            accountant_telegram_ids: Vec::new(),
            accountant_usernames: vec!["bookkeeper".to_string()],
            accountant_username: None,
            assigned_accountant_id: None,
            assigned_accountant_telegram_id: None,
            assigned_accountant_username: None,
            manager_telegram_ids: Vec::new(),
            deleted_at: None,
        }
    }

    fn pending_request(chat_id: buhbot_core::types::ChatId, received_at: chrono::DateTime<Utc>) -> Request {
        Request {
            id: RequestId::new(),
            chat_id,
            message_id: 1,
            message_text: "please help".to_string(),
            client_username: Some("client".to_string()),
            classification: Classification::Request,
            classification_score: 0.9,
            status: RequestStatus::Pending,
            received_at,
            response_at: None,
            response_message_id: None,
            responded_by: None,
            response_time_minutes: None,
            sla_breached: false,
            assigned_to: None,
            thread_id: None,
        }
    }

    fn fake_job(id: &str, payload: &TimerPayload) -> Job {
        let now = Utc::now();
        Job {
            id: id.to_string(),
            queue: QueueName::SlaTimer,
            payload: serde_json::to_string(payload).unwrap(),
            status: buhbot_scheduler::JobStatus::Running,
            run_at: now,
            attempts_made: 0,
            max_attempts: 1,
            backoff: Default::default(),
            remove_on_complete: true,
            remove_on_fail: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn breach_firing_records_alert_and_rearms_next_level() {
        let db = test_db();
        let scheduler = test_scheduler();
        let resolver = Arc::new(ConfigResolver::new(db.clone()));
        let chat = always_open_chat();
        buhbot_store::chats::upsert_chat(&db, &chat).unwrap();

        let request = pending_request(chat.id, Utc::now() - chrono::Duration::minutes(120));
        buhbot_store::requests::create_request(&db, &request).unwrap();

        let handler = EscalationHandler::breach(db.clone(), scheduler.clone(), resolver);
        let payload = TimerPayload { request_id: request.id.to_string(), chat_id: chat.id.0, threshold_minutes: 60, level: 1 };
        let job = fake_job(&timer_job_id(request.id), &payload);

        handler.run(&job).unwrap();

        let alerts = buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 1);

        let reloaded = buhbot_store::requests::find_request(&db, request.id).unwrap().unwrap();
        assert!(reloaded.sla_breached);

        // level 2 re-armed since max_escalations defaults to 3.
        assert!(scheduler.cancel(QueueName::SlaTimer, &timer_job_id(request.id)).unwrap());
        // in-chat breach notice and per-recipient dispatch both went to alert-dispatch.
        assert!(scheduler.cancel(QueueName::AlertDispatch, &format!("chat-notify:{}:1", request.id)).unwrap());
        assert!(scheduler.cancel(QueueName::AlertDispatch, &format!("alert:{}:breach:1:bookkeeper", request.id)).unwrap());
    }

    #[test]
    fn duplicate_breach_firing_does_not_double_record_alert() {
        let db = test_db();
        let scheduler = test_scheduler();
        let resolver = Arc::new(ConfigResolver::new(db.clone()));
        let chat = always_open_chat();
        buhbot_store::chats::upsert_chat(&db, &chat).unwrap();

        let request = pending_request(chat.id, Utc::now() - chrono::Duration::minutes(120));
        buhbot_store::requests::create_request(&db, &request).unwrap();

        let handler = EscalationHandler::breach(db.clone(), scheduler.clone(), resolver);
        let payload = TimerPayload { request_id: request.id.to_string(), chat_id: chat.id.0, threshold_minutes: 60, level: 1 };

        handler.run(&fake_job(&timer_job_id(request.id), &payload)).unwrap();
        handler.run(&fake_job(&timer_job_id(request.id), &payload)).unwrap();

        let alerts = buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap();
        assert_eq!(alerts.len(), 1, "re-running the same (request, level, type) firing must not duplicate the alert row");
    }

    #[test]
    fn stale_warning_job_is_dropped_once_percent_is_zero() {
        let db = test_db();
        let scheduler = test_scheduler();
        let chat = always_open_chat();
        buhbot_store::chats::upsert_chat(&db, &chat).unwrap();

        let request = pending_request(chat.id, Utc::now() - chrono::Duration::minutes(120));
        buhbot_store::requests::create_request(&db, &request).unwrap();

        // warnings were disabled after this warn:<id> job was already queued.
        let settings = buhbot_core::types::GlobalSettings { sla_warning_percent: 0, ..Default::default() };
        buhbot_store::settings::put_global_settings(&db, &settings).unwrap();

        let resolver = Arc::new(ConfigResolver::new(db.clone()));
        let handler = EscalationHandler::warning(db.clone(), scheduler, resolver);
        let payload = TimerPayload { request_id: request.id.to_string(), chat_id: chat.id.0, threshold_minutes: 60, level: 1 };
        handler.run(&fake_job(&warn_job_id(request.id), &payload)).unwrap();

        assert!(buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap().is_empty());
    }

    #[test]
    fn answered_request_drops_escalation_silently() {
        let db = test_db();
        let scheduler = test_scheduler();
        let resolver = Arc::new(ConfigResolver::new(db.clone()));
        let chat = always_open_chat();
        buhbot_store::chats::upsert_chat(&db, &chat).unwrap();

        let mut request = pending_request(chat.id, Utc::now() - chrono::Duration::minutes(120));
        request.status = RequestStatus::Answered;
        buhbot_store::requests::create_request(&db, &request).unwrap();

        let handler = EscalationHandler::breach(db.clone(), scheduler.clone(), resolver);
        let payload = TimerPayload { request_id: request.id.to_string(), chat_id: chat.id.0, threshold_minutes: 60, level: 1 };
        handler.run(&fake_job(&timer_job_id(request.id), &payload)).unwrap();

        assert!(buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap().is_empty());
    }

    #[test]
    fn router_dispatches_warn_and_timer_jobs_to_distinct_handlers() {
        // `SlaTimerRouter`'s private fields are reachable from this nested
        // module; exercising them directly avoids standing up an async
        // executor just to drive two handler calls with no real await points.
        let db = test_db();
        let scheduler = test_scheduler();
        let resolver = Arc::new(ConfigResolver::new(db.clone()));
        let chat = always_open_chat();
        buhbot_store::chats::upsert_chat(&db, &chat).unwrap();

        let request = pending_request(chat.id, Utc::now() - chrono::Duration::minutes(120));
        buhbot_store::requests::create_request(&db, &request).unwrap();

        let router = SlaTimerRouter::new(db.clone(), scheduler.clone(), resolver);
        let payload = TimerPayload { request_id: request.id.to_string(), chat_id: chat.id.0, threshold_minutes: 60, level: 1 };

        router.warning.run(&fake_job(&warn_job_id(request.id), &payload)).unwrap();
        let alerts = buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap();
        assert_eq!(alerts[0].alert_type, AlertType::Warning);

        router.breach.run(&fake_job(&timer_job_id(request.id), &payload)).unwrap();
        let alerts = buhbot_store::alerts::list_alerts_for_request(&db, request.id).unwrap();
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::Breach));
    }
}
