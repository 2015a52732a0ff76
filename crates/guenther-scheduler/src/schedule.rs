use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::types::{AutopromptRecord, ScheduleType};

/// Compute the next UTC execution time for `record` strictly after `from`.
///
/// Returns `None` when the record's schedule fields are malformed
/// (unparseable time, missing interval).
pub fn next_run(record: &AutopromptRecord, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match record.schedule_type {
        ScheduleType::Interval => {
            let minutes = record.interval_minutes.filter(|m| *m > 0)?;
            Some(from + Duration::minutes(minutes as i64))
        }

        ScheduleType::Daily => {
            let (hour, minute) = parse_hhmm(record.daily_time.as_deref()?)?;
            let candidate = Utc
                .with_ymd_and_hms(from.year(), from.month(), from.day(), hour, minute, 0)
                .single()?;
            if candidate > from {
                Some(candidate)
            } else {
                // Today's window has passed — advance to tomorrow.
                Some(candidate + Duration::days(1))
            }
        }

        ScheduleType::Weekly => {
            let (hour, minute) = parse_hhmm(record.daily_time.as_deref()?)?;
            // 0 = Monday … 6 = Sunday, matching chrono's num_days_from_monday.
            let target_dow = i64::from(record.weekly_day.unwrap_or(0).min(6));
            let today_dow = from.weekday().num_days_from_monday() as i64;

            let days_ahead = target_dow - today_dow;
            let candidate_day = if days_ahead < 0 {
                from + Duration::days(7 + days_ahead)
            } else {
                from + Duration::days(days_ahead)
            };

            let candidate = Utc
                .with_ymd_and_hms(
                    candidate_day.year(),
                    candidate_day.month(),
                    candidate_day.day(),
                    hour,
                    minute,
                    0,
                )
                .single()?;

            if candidate > from {
                Some(candidate)
            } else {
                // The time on the target weekday has already passed.
                Some(candidate + Duration::days(7))
            }
        }
    }
}

fn parse_hhmm(time: &str) -> Option<(u32, u32)> {
    let (h, m) = time.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleType;

    fn record(schedule_type: ScheduleType) -> AutopromptRecord {
        let mut r = AutopromptRecord::new("test", "mach was");
        r.schedule_type = schedule_type;
        r
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn interval_fires_one_interval_later() {
        let mut r = record(ScheduleType::Interval);
        r.interval_minutes = Some(30);
        let from = at(2024, 3, 1, 12, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 1, 12, 30, 0)));

        r.interval_minutes = None;
        assert!(next_run(&r, from).is_none());
    }

    #[test]
    fn daily_before_and_after_window() {
        let mut r = record(ScheduleType::Daily);
        r.daily_time = Some("08:00".to_string());

        // Before 08:00 — fires today.
        let from = at(2024, 3, 1, 6, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 1, 8, 0, 0)));

        // After 08:00 — fires tomorrow.
        let from = at(2024, 3, 1, 8, 0, 30);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 2, 8, 0, 0)));

        // Exactly 08:00:00 counts as passed (strictly after `from`).
        let from = at(2024, 3, 1, 8, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 2, 8, 0, 0)));
    }

    #[test]
    fn weekly_targets_correct_weekday() {
        let mut r = record(ScheduleType::Weekly);
        r.daily_time = Some("10:30".to_string());
        r.weekly_day = Some(0); // Monday

        // Friday 2024-03-01 → next Monday 2024-03-04.
        let from = at(2024, 3, 1, 12, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 4, 10, 30, 0)));

        // Monday morning before the window → same day.
        let from = at(2024, 3, 4, 9, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 4, 10, 30, 0)));

        // Monday after the window → a week later.
        let from = at(2024, 3, 4, 11, 0, 0);
        assert_eq!(next_run(&r, from), Some(at(2024, 3, 11, 10, 30, 0)));
    }

    #[test]
    fn bad_time_strings_are_rejected() {
        let mut r = record(ScheduleType::Daily);
        for bad in ["", "8", "25:00", "08:61", "ab:cd"] {
            r.daily_time = Some(bad.to_string());
            assert!(next_run(&r, Utc::now()).is_none(), "accepted {bad:?}");
        }
    }
}
