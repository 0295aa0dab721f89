use buhbot_core::types::{AccountantUserId, AuditContext, ChatId, Request, RequestId, RequestStatus};
use buhbot_store::audit::RequestPatch;
use buhbot_store::requests::AnswerPatch;
use buhbot_store::Db;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{RequestsError, Result};

/// §4.6's state machine: legal next statuses per current status.
fn allowed_next(from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;
    match from {
        Pending => &[InProgress, WaitingClient, Transferred, Answered, Escalated, Closed],
        InProgress => &[WaitingClient, Transferred, Answered, Escalated, Closed],
        WaitingClient => &[InProgress, Answered, Closed],
        Transferred => &[InProgress, Answered, Closed],
        Escalated => &[InProgress, Answered, Closed],
        Answered => &[Closed],
        Closed => &[],
    }
}

/// Validated transition, applied under audit context. Rejects moves not in
/// [`allowed_next`] with [`RequestsError::InvalidTransition`] before the
/// store is touched.
pub fn update_status(
    db: &Db,
    id: RequestId,
    new_status: RequestStatus,
    changed_by: &str,
    reason: &str,
) -> Result<()> {
    let current = buhbot_store::requests::find_request(db, id)?
        .ok_or_else(|| RequestsError::NotFound(id.to_string()))?;

    if current.status == new_status {
        return Ok(());
    }

    if !allowed_next(current.status).contains(&new_status) {
        warn!(%id, from = %current.status, to = %new_status, "rejected invalid transition");
        return Err(RequestsError::InvalidTransition { from: current.status, to: new_status });
    }

    let patch = RequestPatch { status: Some(new_status), ..Default::default() };
    buhbot_store::audit::update_request_with_audit(
        db,
        id,
        &patch,
        &AuditContext::actor(changed_by, reason),
    )?;
    info!(%id, from = %current.status, to = %new_status, "status transition applied");
    Ok(())
}

/// Outcome of [`match_response_target`].
pub enum ResponseTarget {
    /// A claimable request was found; answer it.
    Found(Request),
    /// A reply-to target exists but is already answered — ignore the reply.
    AlreadyAnswered,
    /// No candidate request exists for this chat.
    None,
}

/// §4.6 response matching:
/// 1. Reply-to reference present → look up `(chatID, replyToMessageID)`; if
///    found and claimable, that's the target; if found but already answered,
///    ignore.
/// 2. Otherwise, the latest (LIFO) pending request for the chat.
pub fn match_response_target(db: &Db, chat_id: ChatId, reply_to_message_id: Option<i64>) -> Result<ResponseTarget> {
    if let Some(message_id) = reply_to_message_id {
        match buhbot_store::requests::find_request_by_chat_message(db, chat_id, message_id)? {
            Some(request) if request.status.is_claimable() => return Ok(ResponseTarget::Found(request)),
            Some(_) => return Ok(ResponseTarget::AlreadyAnswered),
            None => {}
        }
    }

    match buhbot_store::requests::latest_pending(db, chat_id)? {
        Some(request) => Ok(ResponseTarget::Found(request)),
        None => Ok(ResponseTarget::None),
    }
}

/// Race-critical answer claim (§4.6 "Answering is race-critical"). Returns
/// `true` if this call won the race, `false` if another responder already
/// claimed the request — the caller aborts silently on `false`.
pub fn claim_answer(
    db: &Db,
    id: RequestId,
    response_at: DateTime<Utc>,
    response_message_id: i64,
    responded_by: AccountantUserId,
    response_time_minutes: i64,
) -> Result<bool> {
    let patch = AnswerPatch {
        status: RequestStatus::Answered,
        response_at,
        response_message_id,
        responded_by,
        response_time_minutes,
    };
    let rows = buhbot_store::requests::update_if_status_in(db, id, &RequestStatus::CLAIMABLE, &patch)?;
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_core::types::{ChatId, Classification};
    use buhbot_store::db::open_test_db;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn test_db() -> Db {
        Arc::new(Mutex::new(open_test_db()))
    }

    fn make_request(chat_id: i64, message_id: i64, status: RequestStatus) -> Request {
        Request {
            id: RequestId::new(),
            chat_id: ChatId(chat_id),
            message_id,
            message_text: "help".to_string(),
            client_username: Some("alice".to_string()),
            classification: Classification::Request,
            classification_score: 0.9,
            status,
            received_at: Utc::now(),
            response_at: None,
            response_message_id: None,
            responded_by: None,
            response_time_minutes: None,
            sla_breached: false,
            assigned_to: None,
            thread_id: None,
        }
    }

    #[test]
    fn pending_to_closed_is_allowed() {
        let db = test_db();
        let req = make_request(1, 1, RequestStatus::Pending);
        buhbot_store::requests::create_request(&db, &req).unwrap();
        update_status(&db, req.id, RequestStatus::Closed, "system", "test").unwrap();
        let reloaded = buhbot_store::requests::find_request(&db, req.id).unwrap().unwrap();
        assert_eq!(reloaded.status, RequestStatus::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let db = test_db();
        let req = make_request(1, 1, RequestStatus::Closed);
        buhbot_store::requests::create_request(&db, &req).unwrap();
        let err = update_status(&db, req.id, RequestStatus::InProgress, "system", "test").unwrap_err();
        assert!(matches!(err, RequestsError::InvalidTransition { .. }));
    }

    #[test]
    fn waiting_client_cannot_skip_to_escalated() {
        let db = test_db();
        let req = make_request(1, 1, RequestStatus::WaitingClient);
        buhbot_store::requests::create_request(&db, &req).unwrap();
        let err = update_status(&db, req.id, RequestStatus::Escalated, "system", "test").unwrap_err();
        assert!(matches!(err, RequestsError::InvalidTransition { .. }));
    }

    #[test]
    fn reply_to_already_answered_is_ignored() {
        let db = test_db();
        let req = make_request(1, 10, RequestStatus::Answered);
        buhbot_store::requests::create_request(&db, &req).unwrap();

        let target = match_response_target(&db, ChatId(1), Some(10)).unwrap();
        assert!(matches!(target, ResponseTarget::AlreadyAnswered));
    }

    #[test]
    fn no_reply_to_falls_back_to_lifo() {
        let db = test_db();
        let earlier = make_request(1, 1, RequestStatus::Pending);
        buhbot_store::requests::create_request(&db, &earlier).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut later = make_request(1, 2, RequestStatus::Pending);
        later.received_at = Utc::now() + chrono::Duration::seconds(1);
        buhbot_store::requests::create_request(&db, &later).unwrap();

        let target = match_response_target(&db, ChatId(1), None).unwrap();
        match target {
            ResponseTarget::Found(request) => assert_eq!(request.id, later.id),
            _ => panic!("expected a found target"),
        }
    }

    #[test]
    fn claim_race_second_caller_loses() {
        let db = test_db();
        let req = make_request(1, 1, RequestStatus::Pending);
        buhbot_store::requests::create_request(&db, &req).unwrap();

        let responder = AccountantUserId(Uuid::now_v7());
        let won = claim_answer(&db, req.id, Utc::now(), 5, responder.clone(), 10).unwrap();
        let lost = claim_answer(&db, req.id, Utc::now(), 6, responder, 11).unwrap();

        assert!(won);
        assert!(!lost);
    }
}
