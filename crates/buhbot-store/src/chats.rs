use std::sync::{Arc, Mutex};

use buhbot_core::types::{AccountantUserId, Chat, ChatId, ChatKind, ClientTier, TelegramUserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;

/// Look up a chat by platform ID. Returns `None` if it does not exist —
/// callers distinguish "never admitted" from "soft-deleted" via
/// [`Chat::is_deleted`].
#[instrument(skip(db))]
pub fn find_chat(db: &Arc<Mutex<rusqlite::Connection>>, id: ChatId) -> Result<Option<Chat>> {
    let conn = db.lock().unwrap();
    match conn.query_row(SELECT_CHAT, params![id.0], row_to_chat) {
        Ok(chat) => Ok(Some(chat)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(db))]
pub fn list_chats(db: &Arc<Mutex<rusqlite::Connection>>) -> Result<Vec<Chat>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_CHAT_BASE))?;
    let rows = stmt.query_map([], row_to_chat)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[instrument(skip(db))]
pub fn upsert_chat(db: &Arc<Mutex<rusqlite::Connection>>, chat: &Chat) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO chats (
            id, title, kind, monitoring_enabled, sla_enabled, notify_in_chat_on_breach,
            is_24x7_mode, sla_threshold_minutes, client_tier, accountant_telegram_ids,
            accountant_usernames, accountant_username, assigned_accountant_id,
            assigned_accountant_telegram_id, assigned_accountant_username,
            manager_telegram_ids, deleted_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            kind = excluded.kind,
            monitoring_enabled = excluded.monitoring_enabled,
            sla_enabled = excluded.sla_enabled,
            notify_in_chat_on_breach = excluded.notify_in_chat_on_breach,
            is_24x7_mode = excluded.is_24x7_mode,
            sla_threshold_minutes = excluded.sla_threshold_minutes,
            client_tier = excluded.client_tier,
            accountant_telegram_ids = excluded.accountant_telegram_ids,
            accountant_usernames = excluded.accountant_usernames,
            accountant_username = excluded.accountant_username,
            assigned_accountant_id = excluded.assigned_accountant_id,
            assigned_accountant_telegram_id = excluded.assigned_accountant_telegram_id,
            assigned_accountant_username = excluded.assigned_accountant_username,
            manager_telegram_ids = excluded.manager_telegram_ids,
            deleted_at = excluded.deleted_at",
        params![
            chat.id.0,
            chat.title,
            chat.kind.to_string(),
            chat.monitoring_enabled,
            chat.sla_enabled,
            chat.notify_in_chat_on_breach,
            chat.is_24x7_mode,
            chat.sla_threshold_minutes,
            chat.client_tier.map(|t| t.to_string()),
            serde_json::to_string(&chat.accountant_telegram_ids.iter().map(|i| i.0).collect::<Vec<_>>())?,
            serde_json::to_string(&chat.accountant_usernames)?,
            chat.accountant_username,
            chat.assigned_accountant_id.as_ref().map(|a| a.0.to_string()),
            chat.assigned_accountant_telegram_id.map(|i| i.0),
            chat.assigned_accountant_username,
            serde_json::to_string(&chat.manager_telegram_ids.iter().map(|i| i.0).collect::<Vec<_>>())?,
            chat.deleted_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

/// Soft-delete: sets `deleted_at` and implicitly disables monitoring.
#[instrument(skip(db))]
pub fn soft_delete_chat(db: &Arc<Mutex<rusqlite::Connection>>, id: ChatId, now: DateTime<Utc>) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE chats SET deleted_at = ?1, monitoring_enabled = 0 WHERE id = ?2",
        params![now.to_rfc3339(), id.0],
    )?;
    Ok(())
}

const SELECT_CHAT_BASE: &str = "SELECT id, title, kind, monitoring_enabled, sla_enabled,
        notify_in_chat_on_breach, is_24x7_mode, sla_threshold_minutes, client_tier,
        accountant_telegram_ids, accountant_usernames, accountant_username,
        assigned_accountant_id, assigned_accountant_telegram_id, assigned_accountant_username,
        manager_telegram_ids, deleted_at
     FROM chats";

const SELECT_CHAT: &str = "SELECT id, title, kind, monitoring_enabled, sla_enabled,
        notify_in_chat_on_breach, is_24x7_mode, sla_threshold_minutes, client_tier,
        accountant_telegram_ids, accountant_usernames, accountant_username,
        assigned_accountant_id, assigned_accountant_telegram_id, assigned_accountant_username,
        manager_telegram_ids, deleted_at
     FROM chats WHERE id = ?1";

fn row_to_chat(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let ids_json: String = row.get(9)?;
    let usernames_json: String = row.get(10)?;
    let managers_json: String = row.get(15)?;

    let accountant_telegram_ids: Vec<i64> = serde_json::from_str(&ids_json).unwrap_or_default();
    let accountant_usernames: Vec<String> = serde_json::from_str(&usernames_json).unwrap_or_default();
    let manager_telegram_ids: Vec<i64> = serde_json::from_str(&managers_json).unwrap_or_default();

    let kind_str: String = row.get(2)?;
    let client_tier_str: Option<String> = row.get(8)?;
    let assigned_accountant_id_str: Option<String> = row.get(12)?;
    let deleted_at_str: Option<String> = row.get(16)?;

    Ok(Chat {
        id: ChatId(row.get(0)?),
        title: row.get(1)?,
        kind: kind_str.parse::<ChatKind>().unwrap_or_default(),
        monitoring_enabled: row.get(3)?,
        sla_enabled: row.get(4)?,
        notify_in_chat_on_breach: row.get(5)?,
        is_24x7_mode: row.get(6)?,
        sla_threshold_minutes: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
        client_tier: client_tier_str.and_then(|s| s.parse::<ClientTier>().ok()),
        accountant_telegram_ids: accountant_telegram_ids.into_iter().map(TelegramUserId).collect(),
        accountant_usernames,
        accountant_username: row.get(11)?,
        assigned_accountant_id: assigned_accountant_id_str
            .and_then(|s| Uuid::parse_str(&s).ok())
            .map(AccountantUserId),
        assigned_accountant_telegram_id: row.get::<_, Option<i64>>(13)?.map(TelegramUserId),
        assigned_accountant_username: row.get(14)?,
        manager_telegram_ids: manager_telegram_ids.into_iter().map(TelegramUserId).collect(),
        deleted_at: deleted_at_str.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
    })
}
