use std::sync::{Arc, Mutex};

use buhbot_core::types::{ChatId, ChatMessage, RequestId, TelegramUserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;

/// Persists the raw inbound message — §4.10 step 2, observability only.
/// Callers treat failures as non-fatal to the ingress pipeline.
#[instrument(skip(db, message))]
pub fn insert_message(db: &Arc<Mutex<rusqlite::Connection>>, message: &ChatMessage) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO chat_messages (chat_id, message_id, from_user_id, from_username, text, received_at, resolved_request_id)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            message.chat_id.0,
            message.message_id,
            message.from_user_id.0,
            message.from_username,
            message.text,
            message.received_at.to_rfc3339(),
            message.resolved_request_id.map(|id| id.0.to_string()),
        ],
    )?;
    Ok(())
}

/// Stamps a previously-persisted message with the Request it resolved to —
/// used by the responder branch once §4.6 matching identifies the target.
#[instrument(skip(db))]
pub fn annotate_resolved_request(
    db: &Arc<Mutex<rusqlite::Connection>>,
    chat_id: ChatId,
    message_id: i64,
    request_id: RequestId,
) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE chat_messages SET resolved_request_id = ?1 WHERE chat_id = ?2 AND message_id = ?3",
        params![request_id.0.to_string(), chat_id.0, message_id],
    )?;
    Ok(())
}

#[allow(dead_code)]
fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let received_at_str: String = row.get(5)?;
    let resolved_str: Option<String> = row.get(6)?;
    Ok(ChatMessage {
        chat_id: ChatId(row.get(0)?),
        message_id: row.get(1)?,
        from_user_id: TelegramUserId(row.get(2)?),
        from_username: row.get(3)?,
        text: row.get(4)?,
        received_at: DateTime::parse_from_rfc3339(&received_at_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        resolved_request_id: resolved_str.and_then(|s| Uuid::parse_str(&s).ok()).map(RequestId),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;

    fn make_message() -> ChatMessage {
        ChatMessage {
            chat_id: ChatId(1),
            message_id: 10,
            from_user_id: TelegramUserId(99),
            from_username: Some("alice".to_string()),
            text: "hi".to_string(),
            received_at: Utc::now(),
            resolved_request_id: None,
        }
    }

    #[test]
    fn insert_then_annotate_round_trips() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let message = make_message();
        insert_message(&db, &message).unwrap();

        let request_id = RequestId::new();
        annotate_resolved_request(&db, message.chat_id, message.message_id, request_id).unwrap();

        let conn = db.lock().unwrap();
        let stored: Option<String> = conn
            .query_row(
                "SELECT resolved_request_id FROM chat_messages WHERE chat_id = ?1 AND message_id = ?2",
                params![message.chat_id.0, message.message_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, Some(request_id.0.to_string()));
    }
}
