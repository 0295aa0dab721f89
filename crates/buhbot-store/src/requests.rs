use std::sync::{Arc, Mutex};

use buhbot_core::types::{
    AccountantUserId, Chat, ChatId, Classification, ClientTier, Request, RequestId, RequestStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Result, StoreError};

const SELECT_REQUEST: &str = "SELECT id, chat_id, message_id, message_text, client_username,
        classification, classification_score, status, received_at, response_at,
        response_message_id, responded_by, response_time_minutes, sla_breached,
        assigned_to, thread_id
     FROM requests";

#[instrument(skip(db, request))]
pub fn create_request(db: &Arc<Mutex<rusqlite::Connection>>, request: &Request) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO requests (
            id, chat_id, message_id, message_text, client_username, classification,
            classification_score, status, received_at, response_at, response_message_id,
            responded_by, response_time_minutes, sla_breached, assigned_to, thread_id
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        params![
            request.id.0.to_string(),
            request.chat_id.0,
            request.message_id,
            request.message_text,
            request.client_username,
            request.classification.to_string(),
            request.classification_score,
            request.status.to_string(),
            request.received_at.to_rfc3339(),
            request.response_at.map(|t| t.to_rfc3339()),
            request.response_message_id,
            request.responded_by.as_ref().map(|a| a.0.to_string()),
            request.response_time_minutes,
            request.sla_breached,
            request.assigned_to.as_ref().map(|a| a.0.to_string()),
            request.thread_id,
        ],
    )?;
    Ok(())
}

#[instrument(skip(db))]
pub fn find_request(db: &Arc<Mutex<rusqlite::Connection>>, id: RequestId) -> Result<Option<Request>> {
    let conn = db.lock().unwrap();
    match conn.query_row(&format!("{} WHERE id = ?1", SELECT_REQUEST), params![id.0.to_string()], row_to_request) {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Find the request matching a specific platform message within a chat —
/// used for reply-to resolution.
#[instrument(skip(db))]
pub fn find_request_by_chat_message(
    db: &Arc<Mutex<rusqlite::Connection>>,
    chat_id: ChatId,
    message_id: i64,
) -> Result<Option<Request>> {
    let conn = db.lock().unwrap();
    match conn.query_row(
        &format!("{} WHERE chat_id = ?1 AND message_id = ?2", SELECT_REQUEST),
        params![chat_id.0, message_id],
        row_to_request,
    ) {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Oldest-first pending requests for a chat — used by operational listings.
/// Deliberately not shared with [`list_pending_lifo`]: the spec requires the
/// two orderings to stay on separate code paths (see DESIGN.md §"Open
/// question 1").
#[instrument(skip(db))]
pub fn list_pending_fifo(db: &Arc<Mutex<rusqlite::Connection>>, chat_id: ChatId) -> Result<Vec<Request>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "{} WHERE chat_id = ?1 AND status IN ('pending','in_progress','waiting_client','transferred','escalated')
         ORDER BY received_at ASC",
        SELECT_REQUEST
    ))?;
    let rows = stmt.query_map(params![chat_id.0], row_to_request)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Newest-first pending requests for a chat — used by the responder-matching
/// fallback in §4.6 step 2.
#[instrument(skip(db))]
pub fn list_pending_lifo(db: &Arc<Mutex<rusqlite::Connection>>, chat_id: ChatId) -> Result<Vec<Request>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "{} WHERE chat_id = ?1 AND status IN ('pending','in_progress','waiting_client','transferred','escalated')
         ORDER BY received_at DESC",
        SELECT_REQUEST
    ))?;
    let rows = stmt.query_map(params![chat_id.0], row_to_request)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// The latest pending request for a chat (LIFO head) — convenience wrapper
/// around [`list_pending_lifo`] for §4.6 step 2.
pub fn latest_pending(db: &Arc<Mutex<rusqlite::Connection>>, chat_id: ChatId) -> Result<Option<Request>> {
    Ok(list_pending_lifo(db, chat_id)?.into_iter().next())
}

/// Secondary sort used by operational views: higher client tier first.
/// `ClientTier`'s `Ord` impl already orders `premium < vip < standard < basic`,
/// so an ascending sort by tier puts the highest tiers first.
pub fn sort_by_tier_then_received(requests: &mut [Request], tier_of: impl Fn(ChatId) -> Option<ClientTier>) {
    requests.sort_by(|a, b| {
        let ta = tier_of(a.chat_id);
        let tb = tier_of(b.chat_id);
        ta.cmp(&tb).then(a.received_at.cmp(&b.received_at))
    });
}

/// Patch applied by the atomic claim in [`update_if_status_in`].
#[derive(Debug, Clone)]
pub struct AnswerPatch {
    pub status: RequestStatus,
    pub response_at: DateTime<Utc>,
    pub response_message_id: i64,
    pub responded_by: AccountantUserId,
    pub response_time_minutes: i64,
}

/// Atomic conditional update: moves the request to `patch.status` only if its
/// current status is one of `from`. Returns the number of rows changed (0 or
/// 1) — this is the race-free "claim" primitive behind §4.6's answering step
/// and §8 invariant 9. SQLite's single-writer model makes the `UPDATE ...
/// WHERE status IN (...)` itself atomic with respect to concurrent callers.
#[instrument(skip(db, patch))]
pub fn update_if_status_in(
    db: &Arc<Mutex<rusqlite::Connection>>,
    id: RequestId,
    from: &[RequestStatus],
    patch: &AnswerPatch,
) -> Result<u64> {
    let conn = db.lock().unwrap();
    let placeholders: Vec<String> = from.iter().map(|_| "?".to_string()).collect();
    let sql = format!(
        "UPDATE requests SET status = ?, response_at = ?, response_message_id = ?,
            responded_by = ?, response_time_minutes = ?
         WHERE id = ? AND status IN ({})",
        placeholders.join(",")
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(patch.status.to_string()),
        Box::new(patch.response_at.to_rfc3339()),
        Box::new(patch.response_message_id),
        Box::new(patch.responded_by.0.to_string()),
        Box::new(patch.response_time_minutes),
        Box::new(id.0.to_string()),
    ];
    for s in from {
        bind.push(Box::new(s.to_string()));
    }
    let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let rows_changed = stmt.execute(bind_refs.as_slice())?;
    Ok(rows_changed as u64)
}

/// Unconditional status transition, used by [`crate::audit::update_request_with_audit`].
/// Callers must have already validated the transition (see `buhbot-requests`).
#[instrument(skip(db))]
pub fn set_status(db: &Arc<Mutex<rusqlite::Connection>>, id: RequestId, status: RequestStatus) -> Result<u64> {
    let conn = db.lock().unwrap();
    let rows = conn.execute(
        "UPDATE requests SET status = ?1 WHERE id = ?2",
        params![status.to_string(), id.0.to_string()],
    )?;
    Ok(rows as u64)
}

#[instrument(skip(db))]
pub fn set_sla_breached(db: &Arc<Mutex<rusqlite::Connection>>, id: RequestId, breached: bool) -> Result<()> {
    let conn = db.lock().unwrap();
    let rows = conn.execute(
        "UPDATE requests SET sla_breached = ?1 WHERE id = ?2",
        params![breached, id.0.to_string()],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!("request {}", id)));
    }
    Ok(())
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<Request> {
    let id_str: String = row.get(0)?;
    let classification_str: String = row.get(5)?;
    let status_str: String = row.get(7)?;
    let received_at_str: String = row.get(8)?;
    let response_at_str: Option<String> = row.get(9)?;
    let responded_by_str: Option<String> = row.get(11)?;
    let assigned_to_str: Option<String> = row.get(14)?;

    Ok(Request {
        id: RequestId(Uuid::parse_str(&id_str).unwrap_or_default()),
        chat_id: ChatId(row.get(1)?),
        message_id: row.get(2)?,
        message_text: row.get(3)?,
        client_username: row.get(4)?,
        classification: classification_str.parse::<Classification>().unwrap_or(Classification::Spam),
        classification_score: row.get(6)?,
        status: status_str.parse::<RequestStatus>().unwrap_or(RequestStatus::Pending),
        received_at: parse_rfc3339(&received_at_str),
        response_at: response_at_str.map(|s| parse_rfc3339(&s)),
        response_message_id: row.get(10)?,
        responded_by: responded_by_str.and_then(|s| Uuid::parse_str(&s).ok()).map(AccountantUserId),
        response_time_minutes: row.get(12)?,
        sla_breached: row.get(13)?,
        assigned_to: assigned_to_str.and_then(|s| Uuid::parse_str(&s).ok()).map(AccountantUserId),
        thread_id: row.get(15)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

/// Helper used by `buhbot-requests` to decide recipient precedence without
/// re-reading the chat; kept here because it only touches `Chat` fields.
pub fn chat_has_accountants(chat: &Chat) -> bool {
    !chat.accountant_telegram_ids.is_empty()
        || !chat.accountant_usernames.is_empty()
        || chat.accountant_username.is_some()
        || chat.assigned_accountant_telegram_id.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use std::sync::{Arc, Mutex};

    fn make_request(chat_id: i64, received_at: DateTime<Utc>) -> Request {
        Request {
            id: RequestId::new(),
            chat_id: ChatId(chat_id),
            message_id: 1,
            message_text: "help".to_string(),
            client_username: Some("alice".to_string()),
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

    #[test]
    fn claim_is_race_free_between_two_callers() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let mut req = make_request(1, Utc::now());
        req.message_id = 42;
        create_request(&db, &req).unwrap();

        let patch = AnswerPatch {
            status: RequestStatus::Answered,
            response_at: Utc::now(),
            response_message_id: 99,
            responded_by: AccountantUserId(Uuid::now_v7()),
            response_time_minutes: 5,
        };

        let first = update_if_status_in(&db, req.id, &RequestStatus::CLAIMABLE, &patch).unwrap();
        let second = update_if_status_in(&db, req.id, &RequestStatus::CLAIMABLE, &patch).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0, "second claim must lose the race");
    }

    #[test]
    fn lifo_orders_newest_first() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let mut early = make_request(5, Utc::now());
        early.message_id = 1;
        let mut late = make_request(5, Utc::now() + chrono::Duration::minutes(5));
        late.message_id = 2;
        create_request(&db, &early).unwrap();
        create_request(&db, &late).unwrap();

        let lifo = list_pending_lifo(&db, ChatId(5)).unwrap();
        assert_eq!(lifo[0].id, late.id);
        assert_eq!(lifo[1].id, early.id);
    }

    #[test]
    fn fifo_orders_oldest_first() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let mut early = make_request(7, Utc::now());
        early.message_id = 1;
        let mut late = make_request(7, Utc::now() + chrono::Duration::minutes(5));
        late.message_id = 2;
        create_request(&db, &early).unwrap();
        create_request(&db, &late).unwrap();

        let fifo = list_pending_fifo(&db, ChatId(7)).unwrap();
        assert_eq!(fifo[0].id, early.id);
        assert_eq!(fifo[1].id, late.id);
    }
}
