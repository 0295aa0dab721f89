use std::sync::{Arc, Mutex};

use buhbot_core::types::{AccountantUserId, AuditContext, RequestHistoryEntry, RequestId, RequestStatus};
use chrono::Utc;
use rusqlite::params;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::requests::find_request;

/// Fields a caller may change through the audited path. `None` means "leave
/// unchanged"; `Some(None)` on `assigned_to` explicitly clears the assignment.
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub status: Option<RequestStatus>,
    pub assigned_to: Option<Option<AccountantUserId>>,
    pub sla_breached: Option<bool>,
}

/// Applies `patch` to a request and records a best-effort audit trail.
///
/// The history write happens after the parent update and is allowed to fail
/// independently: a lost history row is acceptable, a lost status transition
/// is not. This accepts a narrow TOCTOU window between the snapshot read and
/// the update (a concurrent writer could change the row in between, producing
/// a history entry with a stale `old_value`) — acceptable because history is
/// diagnostic, not authoritative; the authoritative state lives on the row
/// the way [`crate::requests::update_if_status_in`] is.
#[instrument(skip(db, patch, ctx))]
pub fn update_request_with_audit(
    db: &Arc<Mutex<rusqlite::Connection>>,
    id: RequestId,
    patch: &RequestPatch,
    ctx: &AuditContext,
) -> Result<()> {
    let before = find_request(db, id)?;

    {
        let conn = db.lock().unwrap();
        if let Some(status) = patch.status {
            conn.execute(
                "UPDATE requests SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id.0.to_string()],
            )?;
        }
        if let Some(assigned_to) = &patch.assigned_to {
            conn.execute(
                "UPDATE requests SET assigned_to = ?1 WHERE id = ?2",
                params![assigned_to.as_ref().map(|a| a.0.to_string()), id.0.to_string()],
            )?;
        }
        if let Some(sla_breached) = patch.sla_breached {
            conn.execute(
                "UPDATE requests SET sla_breached = ?1 WHERE id = ?2",
                params![sla_breached, id.0.to_string()],
            )?;
        }
    }

    let Some(before) = before else {
        return Ok(());
    };

    let now = Utc::now();
    let mut entries = Vec::new();

    if let Some(status) = patch.status {
        if status != before.status {
            entries.push(RequestHistoryEntry {
                request_id: id,
                field: "status".to_string(),
                old_value: Some(before.status.to_string()),
                new_value: Some(status.to_string()),
                changed_by: ctx.changed_by.clone(),
                reason: ctx.reason.clone(),
                at: now,
            });
        }
    }
    if let Some(assigned_to) = &patch.assigned_to {
        let old = before.assigned_to.as_ref().map(|a| a.0.to_string());
        let new = assigned_to.as_ref().map(|a| a.0.to_string());
        if old != new {
            entries.push(RequestHistoryEntry {
                request_id: id,
                field: "assigned_to".to_string(),
                old_value: old,
                new_value: new,
                changed_by: ctx.changed_by.clone(),
                reason: ctx.reason.clone(),
                at: now,
            });
        }
    }
    if let Some(sla_breached) = patch.sla_breached {
        if sla_breached != before.sla_breached {
            entries.push(RequestHistoryEntry {
                request_id: id,
                field: "sla_breached".to_string(),
                old_value: Some(before.sla_breached.to_string()),
                new_value: Some(sla_breached.to_string()),
                changed_by: ctx.changed_by.clone(),
                reason: ctx.reason.clone(),
                at: now,
            });
        }
    }

    for entry in entries {
        if let Err(err) = insert_history_entry(db, &entry) {
            warn!(request_id = %id, error = %err, "failed to record audit history, continuing");
        }
    }

    Ok(())
}

fn insert_history_entry(db: &Arc<Mutex<rusqlite::Connection>>, entry: &RequestHistoryEntry) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO request_history (request_id, field, old_value, new_value, changed_by, reason, at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            entry.request_id.0.to_string(),
            entry.field,
            entry.old_value,
            entry.new_value,
            entry.changed_by,
            entry.reason,
            entry.at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[instrument(skip(db))]
pub fn list_history(db: &Arc<Mutex<rusqlite::Connection>>, request_id: RequestId) -> Result<Vec<RequestHistoryEntry>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT request_id, field, old_value, new_value, changed_by, reason, at
         FROM request_history WHERE request_id = ?1 ORDER BY at",
    )?;
    let rows = stmt.query_map(params![request_id.0.to_string()], |row| {
        let at_str: String = row.get(6)?;
        Ok(RequestHistoryEntry {
            request_id,
            field: row.get(1)?,
            old_value: row.get(2)?,
            new_value: row.get(3)?,
            changed_by: row.get(4)?,
            reason: row.get(5)?,
            at: chrono::DateTime::parse_from_rfc3339(&at_str)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
