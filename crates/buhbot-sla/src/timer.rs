use std::str::FromStr;

use buhbot_core::clock::WorkingSchedule;
use buhbot_core::types::{AccountantUserId, Chat, ChatId, RequestId};
use buhbot_requests::claim_answer;
use buhbot_scheduler::{EnqueueOptions, QueueName, SchedulerEngine};
use buhbot_settings::ConfigResolver;
use buhbot_store::Db;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SlaError};

/// Payload carried by both `timer:<id>` and `warn:<id>` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerPayload {
    pub request_id: String,
    pub chat_id: i64,
    pub threshold_minutes: u32,
    /// The escalation level this firing will assign if it breaches.
    pub level: u32,
}

pub fn timer_job_id(request_id: RequestId) -> String {
    format!("timer:{request_id}")
}

pub fn warn_job_id(request_id: RequestId) -> String {
    format!("warn:{request_id}")
}

/// §4.8 schedule precedence: 24/7 mode, else active per-chat
/// `WorkingSchedule` rows, else global — and a global spanning the full day
/// across all seven days is itself treated as 24/7.
pub fn resolve_schedule(db: &Db, chat: &Chat) -> Result<WorkingSchedule> {
    if chat.is_24x7_mode {
        return Ok(WorkingSchedule::always_open(chrono_tz::UTC));
    }

    let rows = buhbot_store::settings::list_working_schedules(db, chat.id)?;
    if !rows.is_empty() {
        let first = &rows[0];
        let tz = parse_tz(&first.timezone)?;
        let start = parse_time(&first.start_time)?;
        let end = parse_time(&first.end_time)?;
        let working_days: Vec<u8> = rows.iter().map(|r| r.day_of_week).collect();
        let holidays = buhbot_store::settings::list_holidays(db, Some(chat.id))?;
        return Ok(WorkingSchedule { timezone: tz, working_days, start, end, holidays, is_24x7: false });
    }

    let global = buhbot_store::settings::get_global_settings(db)?;
    let tz = parse_tz(&global.timezone)?;
    let start = parse_time(&global.start_time)?;
    let end = parse_time(&global.end_time)?;
    let is_24x7 = global.working_days.len() == 7
        && start == NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        && end >= NaiveTime::from_hms_opt(23, 59, 0).unwrap();
    let holidays = buhbot_store::settings::list_holidays(db, None)?;

    if is_24x7 {
        return Ok(WorkingSchedule::always_open(tz));
    }
    Ok(WorkingSchedule { timezone: tz, working_days: global.working_days, start, end, holidays, is_24x7: false })
}

fn parse_tz(s: &str) -> Result<Tz> {
    Tz::from_str(s).map_err(|_| SlaError::InvalidTimezone(s.to_string()))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| SlaError::InvalidTimezone(format!("bad time literal: {s}")))
}

/// §4.8 `startSlaTimer`: resolves the schedule, computes the breach delay,
/// and enqueues `timer:<id>` plus — if `slaWarningPercent > 0` — `warn:<id>`.
/// Re-enqueueing with the same job ID supersedes any prior one, giving
/// at-most-one timer and at-most-one warning per request.
pub fn start_sla_timer(
    db: &Db,
    scheduler: &SchedulerEngine,
    resolver: &ConfigResolver,
    request_id: RequestId,
    chat: &Chat,
    received_at: DateTime<Utc>,
    threshold_minutes: u32,
) -> Result<()> {
    let schedule = resolve_schedule(db, chat)?;
    let now = Utc::now();
    let delay_ms = schedule.delay_until_breach(received_at, threshold_minutes, now);

    let timer_payload = TimerPayload {
        request_id: request_id.to_string(),
        chat_id: chat.id.0,
        threshold_minutes,
        level: 1,
    };
    let payload_json = serde_json::to_string(&timer_payload).unwrap_or_default();
    scheduler.enqueue(
        QueueName::SlaTimer,
        &timer_job_id(request_id),
        &payload_json,
        EnqueueOptions { delay_millis: delay_ms, ..Default::default() },
    )?;

    let warning_percent = resolver.sla_warning_percent();
    if warning_percent > 0 {
        let warn_delay_ms = delay_ms * warning_percent as i64 / 100;
        scheduler.enqueue(
            QueueName::SlaTimer,
            &warn_job_id(request_id),
            &payload_json,
            EnqueueOptions { delay_millis: warn_delay_ms, ..Default::default() },
        )?;
    } else {
        debug!(%request_id, "slaWarningPercent is 0, skipping warn enqueue");
    }

    Ok(())
}

/// Outcome of [`stop_sla_timer`].
pub struct StopOutcome {
    pub working_minutes: i64,
    pub breached: bool,
}

/// §4.8 `stopSlaTimer`: cancels both pending jobs for the request, computes
/// `responseTimeMinutes` via C1, and performs the race-critical atomic claim.
#[allow(clippy::too_many_arguments)]
pub fn stop_sla_timer(
    db: &Db,
    scheduler: &SchedulerEngine,
    request_id: RequestId,
    chat: &Chat,
    received_at: DateTime<Utc>,
    threshold_minutes: u32,
    response_at: DateTime<Utc>,
    response_message_id: i64,
    responded_by: AccountantUserId,
) -> Result<StopOutcome> {
    let _ = scheduler.cancel(QueueName::SlaTimer, &timer_job_id(request_id));
    let _ = scheduler.cancel(QueueName::SlaTimer, &warn_job_id(request_id));

    let schedule = resolve_schedule(db, chat)?;
    let working_minutes = schedule.working_minutes_between(received_at, response_at);
    let breached = working_minutes > threshold_minutes as i64;

    let claimed = claim_answer(db, request_id, response_at, response_message_id, responded_by, working_minutes)?;
    if !claimed {
        warn!(%request_id, "stop_sla_timer: claim lost, another responder already answered");
    }

    Ok(StopOutcome { working_minutes, breached })
}

pub fn chat_id_from_payload(payload: &TimerPayload) -> ChatId {
    ChatId(payload.chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_core::types::ChatKind;
    use buhbot_store::db::open_test_db;
    use std::sync::{Arc, Mutex};

    fn test_db() -> Db {
        Arc::new(Mutex::new(open_test_db()))
    }

    fn test_scheduler() -> SchedulerEngine {
        SchedulerEngine::new(buhbot_scheduler::db::open_test_db()).unwrap()
    }

    fn bare_chat() -> Chat {
        Chat {
            id: ChatId(1),
            title: None,
            kind: ChatKind::Group,
            monitoring_enabled: true,
            sla_enabled: true,
            notify_in_chat_on_breach: false,
            is_24x7_mode: false,
            sla_threshold_minutes: None,
            client_tier: None,
            accountant_telegram_ids: Vec::new(),
            accountant_usernames: Vec::new(),
            accountant_username: None,
            assigned_accountant_id: None,
            assigned_accountant_telegram_id: None,
            assigned_accountant_username: None,
            manager_telegram_ids: Vec::new(),
            deleted_at: None,
        }
    }

    #[test]
    fn twenty_four_seven_chat_resolves_to_always_open() {
        let db = test_db();
        let mut chat = bare_chat();
        chat.is_24x7_mode = true;
        let schedule = resolve_schedule(&db, &chat).unwrap();
        assert!(schedule.is_24x7);
    }

    #[test]
    fn no_per_chat_rows_falls_back_to_global_default() {
        let db = test_db();
        let chat = bare_chat();
        let schedule = resolve_schedule(&db, &chat).unwrap();
        assert!(!schedule.is_24x7);
        assert_eq!(schedule.working_days, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn start_and_stop_round_trip_enqueues_and_cancels() {
        let db = test_db();
        let scheduler = test_scheduler();
        let resolver = ConfigResolver::new(db.clone());
        let chat = bare_chat();
        let request_id = RequestId::new();

        start_sla_timer(&db, &scheduler, &resolver, request_id, &chat, Utc::now(), 60).unwrap();
        assert!(scheduler.cancel(QueueName::SlaTimer, &timer_job_id(request_id)).unwrap());
    }
}
