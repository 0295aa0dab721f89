use std::sync::{Arc, Mutex};

use buhbot_core::types::{GlobalSettings, Holiday, TelegramUserId, WorkingScheduleRow};
use rusqlite::{params, Row};
use tracing::instrument;

use crate::error::Result;

/// Read the singleton settings row, falling back to [`GlobalSettings::default`]
/// if the table has never been seeded (fresh install).
#[instrument(skip(db))]
pub fn get_global_settings(db: &Arc<Mutex<rusqlite::Connection>>) -> Result<GlobalSettings> {
    let conn = db.lock().unwrap();
    match conn.query_row(
        "SELECT timezone, working_days, start_time, end_time, default_sla_threshold_minutes,
                max_escalations, escalation_interval_minutes, sla_warning_percent,
                global_manager_telegram_ids, ai_confidence_threshold
         FROM global_settings WHERE id = 1",
        [],
        row_to_settings,
    ) {
        Ok(s) => Ok(s),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(GlobalSettings::default()),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(db, settings))]
pub fn put_global_settings(db: &Arc<Mutex<rusqlite::Connection>>, settings: &GlobalSettings) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO global_settings (
            id, timezone, working_days, start_time, end_time, default_sla_threshold_minutes,
            max_escalations, escalation_interval_minutes, sla_warning_percent,
            global_manager_telegram_ids, ai_confidence_threshold
         ) VALUES (1,?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(id) DO UPDATE SET
            timezone = excluded.timezone,
            working_days = excluded.working_days,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            default_sla_threshold_minutes = excluded.default_sla_threshold_minutes,
            max_escalations = excluded.max_escalations,
            escalation_interval_minutes = excluded.escalation_interval_minutes,
            sla_warning_percent = excluded.sla_warning_percent,
            global_manager_telegram_ids = excluded.global_manager_telegram_ids,
            ai_confidence_threshold = excluded.ai_confidence_threshold",
        params![
            settings.timezone,
            serde_json::to_string(&settings.working_days)?,
            settings.start_time,
            settings.end_time,
            settings.default_sla_threshold_minutes,
            settings.max_escalations,
            settings.escalation_interval_minutes,
            settings.sla_warning_percent,
            serde_json::to_string(&settings.global_manager_telegram_ids.iter().map(|i| i.0).collect::<Vec<_>>())?,
            settings.ai_confidence_threshold,
        ],
    )?;
    Ok(())
}

fn row_to_settings(row: &Row<'_>) -> rusqlite::Result<GlobalSettings> {
    let working_days_json: String = row.get(1)?;
    let manager_ids_json: String = row.get(8)?;
    Ok(GlobalSettings {
        timezone: row.get(0)?,
        working_days: serde_json::from_str(&working_days_json).unwrap_or_else(|_| vec![1, 2, 3, 4, 5]),
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        default_sla_threshold_minutes: row.get(4)?,
        max_escalations: row.get(5)?,
        escalation_interval_minutes: row.get(6)?,
        sla_warning_percent: row.get(7)?,
        global_manager_telegram_ids: serde_json::from_str::<Vec<i64>>(&manager_ids_json)
            .unwrap_or_default()
            .into_iter()
            .map(TelegramUserId)
            .collect(),
        ai_confidence_threshold: row.get(9)?,
    })
}

#[instrument(skip(db))]
pub fn list_working_schedules(
    db: &Arc<Mutex<rusqlite::Connection>>,
    chat_id: buhbot_core::types::ChatId,
) -> Result<Vec<WorkingScheduleRow>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT chat_id, day_of_week, start_time, end_time, timezone, is_active
         FROM working_schedules WHERE chat_id = ?1 AND is_active = 1",
    )?;
    let rows = stmt.query_map(params![chat_id.0], |row| {
        Ok(WorkingScheduleRow {
            chat_id: buhbot_core::types::ChatId(row.get(0)?),
            day_of_week: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            timezone: row.get(4)?,
            is_active: row.get(5)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[instrument(skip(db, schedule))]
pub fn put_working_schedule(db: &Arc<Mutex<rusqlite::Connection>>, schedule: &WorkingScheduleRow) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO working_schedules (chat_id, day_of_week, start_time, end_time, timezone, is_active)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            schedule.chat_id.0,
            schedule.day_of_week,
            schedule.start_time,
            schedule.end_time,
            schedule.timezone,
            schedule.is_active,
        ],
    )?;
    Ok(())
}

#[instrument(skip(db))]
pub fn list_holidays(db: &Arc<Mutex<rusqlite::Connection>>, chat_id: Option<buhbot_core::types::ChatId>) -> Result<Vec<Holiday>> {
    let conn = db.lock().unwrap();
    let mut stmt = conn.prepare("SELECT year, month, day FROM holidays WHERE chat_id IS ?1 OR chat_id IS NULL")?;
    let rows = stmt.query_map(params![chat_id.map(|c| c.0)], |row| {
        Ok(Holiday {
            year: row.get(0)?,
            month: row.get(1)?,
            day: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[instrument(skip(db))]
pub fn add_holiday(db: &Arc<Mutex<rusqlite::Connection>>, chat_id: Option<buhbot_core::types::ChatId>, holiday: Holiday) -> Result<()> {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO holidays (chat_id, year, month, day) VALUES (?1,?2,?3,?4)",
        params![chat_id.map(|c| c.0), holiday.year, holiday.month, holiday.day],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;

    #[test]
    fn missing_singleton_row_falls_back_to_defaults() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let settings = get_global_settings(&db).unwrap();
        assert_eq!(settings.default_sla_threshold_minutes, 60);
    }

    #[test]
    fn put_then_get_round_trips() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let mut settings = GlobalSettings::default();
        settings.default_sla_threshold_minutes = 45;
        settings.timezone = "Europe/Moscow".to_string();
        put_global_settings(&db, &settings).unwrap();

        let loaded = get_global_settings(&db).unwrap();
        assert_eq!(loaded.default_sla_threshold_minutes, 45);
        assert_eq!(loaded.timezone, "Europe/Moscow");
    }
}
