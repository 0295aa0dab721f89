//! Working-hours arithmetic.
//!
//! All conversions happen in the schedule's configured IANA timezone so that
//! daylight-saving transitions never shift a working window — comparing UTC
//! wall-clock instants directly against a fixed HH:MM would double- or
//! under-count minutes on the two DST-transition days of the year.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::types::Holiday;

/// Maximum number of days `next_working_time`/`add_working_minutes` scan
/// forward before giving up — guards against infinite loops on a schedule
/// with no working days configured at all.
const MAX_SCAN_DAYS: i64 = 365;

/// A chat's (or the global) working-hours configuration.
#[derive(Debug, Clone)]
pub struct WorkingSchedule {
    pub timezone: Tz,
    /// ISO weekday numbers, 1 = Monday … 7 = Sunday.
    pub working_days: Vec<u8>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub holidays: Vec<Holiday>,
    pub is_24x7: bool,
}

impl WorkingSchedule {
    pub fn always_open(timezone: Tz) -> Self {
        Self {
            timezone,
            working_days: (1..=7).collect(),
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            holidays: Vec::new(),
            is_24x7: true,
        }
    }

    fn is_holiday(&self, t: DateTime<Tz>) -> bool {
        self.holidays
            .iter()
            .any(|h| h.year == t.year() && h.month == t.month() && h.day == t.day())
    }

    fn is_working_day(&self, t: DateTime<Tz>) -> bool {
        let iso_weekday = t.weekday().number_from_monday() as u8;
        self.working_days.contains(&iso_weekday)
    }

    /// `isWorkingTime(t)` — half-open at the end: `start ≤ tod < end`.
    pub fn is_working_time(&self, t: DateTime<Utc>) -> bool {
        if self.is_24x7 {
            return true;
        }
        let local = t.with_timezone(&self.timezone);
        if self.is_holiday(local) || !self.is_working_day(local) {
            return false;
        }
        let tod = local.time();
        tod >= self.start && tod < self.end
    }

    /// `nextWorkingTime(t)` — earliest instant ≥ `t` satisfying `is_working_time`.
    pub fn next_working_time(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_24x7 || self.is_working_time(t) {
            return t;
        }

        let mut local = t.with_timezone(&self.timezone);

        for _ in 0..MAX_SCAN_DAYS {
            if self.is_working_day(local) && !self.is_holiday(local) {
                let today_start = local.date_naive().and_time(self.start);
                let candidate = self
                    .timezone
                    .from_local_datetime(&today_start)
                    .single()
                    .unwrap_or(local);
                if candidate >= local {
                    return candidate.with_timezone(&Utc);
                }
            }
            // Advance to the start of the next calendar day and retry.
            let next_midnight = (local.date_naive() + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap();
            local = self
                .timezone
                .from_local_datetime(&next_midnight)
                .single()
                .unwrap_or(local + Duration::days(1));
        }

        warn!("next_working_time scanned {} days with no working window found", MAX_SCAN_DAYS);
        t
    }

    /// `workingMinutesBetween(a, b)` — zero if `b <= a`; raw minute diff for
    /// 24/7 schedules; otherwise sum each day's overlap with `[start, end]`.
    pub fn working_minutes_between(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
        if b <= a {
            return 0;
        }
        if self.is_24x7 {
            return (b - a).num_minutes();
        }

        let a_local = a.with_timezone(&self.timezone);
        let b_local = b.with_timezone(&self.timezone);

        let mut total = 0i64;
        let mut day = a_local.date_naive();
        let last_day = b_local.date_naive();

        loop {
            let day_dt = self
                .timezone
                .from_local_datetime(&day.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()))
                .single();

            if let Some(day_dt) = day_dt {
                if self.is_working_day(day_dt) && !self.is_holiday(day_dt) {
                    let window_start = self
                        .timezone
                        .from_local_datetime(&day.and_time(self.start))
                        .single();
                    let window_end = self
                        .timezone
                        .from_local_datetime(&day.and_time(self.end))
                        .single();

                    if let (Some(window_start), Some(window_end)) = (window_start, window_end) {
                        let clamp_lo = window_start.max(a_local);
                        let clamp_hi = window_end.min(b_local);
                        if clamp_hi > clamp_lo {
                            total += (clamp_hi - clamp_lo).num_minutes();
                        }
                    }
                }
            }

            if day >= last_day {
                break;
            }
            day += Duration::days(1);
        }

        total
    }

    /// Skip over non-working gaps, clamping daily, to find the instant at
    /// which exactly `minutes` working minutes have elapsed since `from`.
    fn add_working_minutes(&self, from: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        if self.is_24x7 {
            return from + Duration::minutes(minutes);
        }
        if minutes <= 0 {
            return self.next_working_time(from);
        }

        let mut cursor = self.next_working_time(from);
        let mut remaining = minutes;

        for _ in 0..MAX_SCAN_DAYS {
            let local = cursor.with_timezone(&self.timezone);
            let day_end = self
                .timezone
                .from_local_datetime(&local.date_naive().and_time(self.end))
                .single()
                .unwrap_or(local);

            let minutes_left_today = (day_end - local).num_minutes().max(0);

            if remaining <= minutes_left_today {
                return (local + Duration::minutes(remaining)).with_timezone(&Utc);
            }

            remaining -= minutes_left_today;
            let next_midnight = (local.date_naive() + Duration::days(1))
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let next_day_start = self
                .timezone
                .from_local_datetime(&next_midnight)
                .single()
                .unwrap_or(local + Duration::days(1));
            cursor = self.next_working_time(next_day_start.with_timezone(&Utc));
        }

        warn!("add_working_minutes scanned {} days without resolving", MAX_SCAN_DAYS);
        cursor
    }

    /// `delayUntilBreach(receivedAt, thresholdMinutes)` — non-negative
    /// milliseconds from *now* until `workingMinutesBetween(receivedAt,
    /// instant) == thresholdMinutes`.
    pub fn delay_until_breach(&self, received_at: DateTime<Utc>, threshold_minutes: u32, now: DateTime<Utc>) -> i64 {
        let breach_instant = self.add_working_minutes(received_at, threshold_minutes as i64);
        (breach_instant - now).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn moscow_9_to_6() -> WorkingSchedule {
        WorkingSchedule {
            timezone: chrono_tz::Europe::Moscow,
            working_days: vec![1, 2, 3, 4, 5],
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            holidays: Vec::new(),
            is_24x7: false,
        }
    }

    fn msk(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::Europe::Moscow
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn zero_minutes_between_equal_instants() {
        let sched = moscow_9_to_6();
        let t = msk(2025, 1, 20, 10, 0);
        assert_eq!(sched.working_minutes_between(t, t), 0);
    }

    #[test]
    fn minutes_never_exceed_raw_diff() {
        let sched = moscow_9_to_6();
        let a = msk(2025, 1, 20, 9, 0);
        let b = msk(2025, 1, 22, 18, 0);
        let minutes = sched.working_minutes_between(a, b);
        assert!(minutes <= (b - a).num_minutes());
    }

    #[test]
    fn twenty_four_seven_equals_raw_diff() {
        let sched = WorkingSchedule::always_open(chrono_tz::UTC);
        let a = Utc.with_ymd_and_hms(2025, 1, 18, 3, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 18, 4, 0, 0).unwrap();
        assert_eq!(sched.working_minutes_between(a, b), 60);
    }

    #[test]
    fn start_inclusive_end_exclusive() {
        let sched = moscow_9_to_6();
        assert!(sched.is_working_time(msk(2025, 1, 20, 9, 0)));
        assert!(!sched.is_working_time(msk(2025, 1, 20, 18, 0)));
        assert!(sched.is_working_time(msk(2025, 1, 20, 17, 59)));
    }

    #[test]
    fn holiday_excludes_working_day() {
        let mut sched = moscow_9_to_6();
        sched.holidays.push(Holiday { year: 2025, month: 1, day: 20 });
        assert!(!sched.is_working_time(msk(2025, 1, 20, 10, 0)));
    }

    #[test]
    fn next_working_time_is_idempotent_inside_window() {
        let sched = moscow_9_to_6();
        let t = msk(2025, 1, 20, 10, 0);
        assert_eq!(sched.next_working_time(t), t);
    }

    #[test]
    fn next_working_time_advances_past_weekend() {
        let sched = moscow_9_to_6();
        // Saturday 2025-01-18
        let sat = msk(2025, 1, 18, 10, 0);
        let next = sched.next_working_time(sat);
        assert!(next >= sat);
        assert!(sched.is_working_time(next));
    }

    #[test]
    fn friday_breach_within_same_day_window() {
        let sched = moscow_9_to_6();
        // Friday 2025-01-24 14:55, 60 minute threshold. 185 working minutes
        // remain before 18:00, so 60 fits without rolling into the weekend.
        let received = msk(2025, 1, 24, 14, 55);
        let now = received;
        let delay_ms = sched.delay_until_breach(received, 60, now);
        let expected = msk(2025, 1, 24, 15, 55);
        let actual = now + Duration::milliseconds(delay_ms);
        assert_eq!(actual, expected);
    }

    #[test]
    fn friday_breach_rolls_over_weekend() {
        let sched = moscow_9_to_6();
        // Friday 2025-01-24 14:55, 300 minute threshold: 185 minutes remain
        // before 18:00, leaving 115 to carry into Monday 09:00 -> 10:55.
        let received = msk(2025, 1, 24, 14, 55);
        let now = received;
        let delay_ms = sched.delay_until_breach(received, 300, now);
        let expected = msk(2025, 1, 27, 10, 55);
        let actual = now + Duration::milliseconds(delay_ms);
        assert_eq!(actual, expected);
    }

    #[test]
    fn twenty_four_seven_chat_breach_same_day() {
        let sched = WorkingSchedule::always_open(chrono_tz::UTC);
        let received = Utc.with_ymd_and_hms(2025, 1, 18, 3, 0, 0).unwrap();
        let delay_ms = sched.delay_until_breach(received, 60, received);
        let actual = received + Duration::milliseconds(delay_ms);
        assert_eq!(actual, Utc.with_ymd_and_hms(2025, 1, 18, 4, 0, 0).unwrap());
    }
}
