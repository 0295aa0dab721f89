use std::sync::{Arc, Mutex};

use buhbot_core::types::{Alert, AlertId, AlertType, RequestId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;

const SELECT_ALERT: &str = "SELECT id, request_id, alert_type, level, minutes_elapsed,
        alert_sent_at, recipients, resolved_action, resolution_notes, acknowledged_at,
        acknowledged_by
     FROM alerts";

/// Insert an alert if no row already exists for `(request_id, level, alert_type)`.
/// Returns `true` if a new row was inserted, `false` if the dedup index
/// rejected it as a duplicate — the breach worker relies on this to make
/// re-delivery of the same warning/breach job idempotent (see §4.9 step 5).
#[instrument(skip(db, alert))]
pub fn insert_alert_if_absent(db: &Arc<Mutex<rusqlite::Connection>>, alert: &Alert) -> Result<bool> {
    let conn = db.lock().unwrap();
    let rows = conn.execute(
        "INSERT OR IGNORE INTO alerts (
            id, request_id, alert_type, level, minutes_elapsed, alert_sent_at,
            recipients, resolved_action, resolution_notes, acknowledged_at, acknowledged_by
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            alert.id.0.to_string(),
            alert.request_id.0.to_string(),
            alert.alert_type.to_string(),
            alert.level,
            alert.minutes_elapsed,
            alert.alert_sent_at.to_rfc3339(),
            serde_json::to_string(&alert.recipients)?,
            alert.resolved_action,
            alert.resolution_notes,
            alert.acknowledged_at.map(|t| t.to_rfc3339()),
            alert.acknowledged_by,
        ],
    )?;
    Ok(rows == 1)
}

#[instrument(skip(db))]
pub fn list_alerts_for_request(db: &Arc<Mutex<rusqlite::Connection>>, request_id: RequestId) -> Result<Vec<Alert>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(&format!("{} WHERE request_id = ?1 ORDER BY alert_sent_at", SELECT_ALERT))?;
    let rows = stmt.query_map(params![request_id.0.to_string()], row_to_alert)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Highest `level` already recorded for a request, across both alert types —
/// used by the breach worker to decide the next escalation level to send.
#[instrument(skip(db))]
pub fn max_alert_level(db: &Arc<Mutex<rusqlite::Connection>>, request_id: RequestId) -> Result<u32> {
    let conn = db.lock().unwrap();
    let level: Option<u32> = conn.query_row(
        "SELECT MAX(level) FROM alerts WHERE request_id = ?1",
        params![request_id.0.to_string()],
        |row| row.get(0),
    )?;
    Ok(level.unwrap_or(0))
}

#[instrument(skip(db))]
pub fn acknowledge_alert(
    db: &Arc<Mutex<rusqlite::Connection>>,
    id: AlertId,
    acknowledged_by: &str,
    resolved_action: Option<&str>,
    resolution_notes: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE alerts SET acknowledged_at = ?1, acknowledged_by = ?2,
            resolved_action = ?3, resolution_notes = ?4 WHERE id = ?5",
        params![at.to_rfc3339(), acknowledged_by, resolved_action, resolution_notes, id.0.to_string()],
    )?;
    Ok(())
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let id_str: String = row.get(0)?;
    let request_id_str: String = row.get(1)?;
    let alert_type_str: String = row.get(2)?;
    let alert_sent_at_str: String = row.get(5)?;
    let recipients_json: String = row.get(6)?;
    let acknowledged_at_str: Option<String> = row.get(9)?;

    Ok(Alert {
        id: AlertId(Uuid::parse_str(&id_str).unwrap_or_default()),
        request_id: RequestId(Uuid::parse_str(&request_id_str).unwrap_or_default()),
        alert_type: alert_type_str.parse::<AlertType>().unwrap_or(AlertType::Warning),
        level: row.get(3)?,
        minutes_elapsed: row.get(4)?,
        alert_sent_at: DateTime::parse_from_rfc3339(&alert_sent_at_str)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        recipients: serde_json::from_str(&recipients_json).unwrap_or_default(),
        resolved_action: row.get(7)?,
        resolution_notes: row.get(8)?,
        acknowledged_at: acknowledged_at_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        acknowledged_by: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;

    fn make_alert(request_id: RequestId, level: u32, alert_type: AlertType) -> Alert {
        Alert {
            id: AlertId::new(),
            request_id,
            alert_type,
            level,
            minutes_elapsed: 60,
            alert_sent_at: Utc::now(),
            recipients: vec!["@accountant".to_string()],
            resolved_action: None,
            resolution_notes: None,
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }

    #[test]
    fn duplicate_dedup_key_is_rejected() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let request_id = RequestId::new();
        let first = make_alert(request_id, 1, AlertType::Warning);
        let mut second = make_alert(request_id, 1, AlertType::Warning);
        second.id = AlertId::new();

        assert!(insert_alert_if_absent(&db, &first).unwrap());
        assert!(!insert_alert_if_absent(&db, &second).unwrap(), "same dedup key must not insert twice");
    }

    #[test]
    fn distinct_levels_both_insert() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let request_id = RequestId::new();
        let warning = make_alert(request_id, 1, AlertType::Warning);
        let breach = make_alert(request_id, 2, AlertType::Breach);

        assert!(insert_alert_if_absent(&db, &warning).unwrap());
        assert!(insert_alert_if_absent(&db, &breach).unwrap());
        assert_eq!(max_alert_level(&db, request_id).unwrap(), 2);
    }
}
