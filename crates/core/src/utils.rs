use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Off-hours are the local hours outside the half-open interval [7, 19).
///
/// 6:59 is off-hours, 7:00 is not, 18:59 is not, 19:00 is.
pub fn is_off_hours(hour: u32) -> bool {
    hour < 7 || hour >= 19
}

/// Treat a naive timestamp read back from storage as UTC.
pub fn assume_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Convert a stored UTC timestamp to the configured display timezone and
/// render it without a trailing timezone marker.
///
/// `2024-06-03T08:30:00Z` displayed in Asia/Kolkata becomes
/// `2024-06-03T14:00:00`.
pub fn to_display_string(ts: DateTime<Utc>, display_tz: Tz) -> String {
    ts.with_timezone(&display_tz)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Local hour of a UTC timestamp in the display timezone.
pub fn display_hour(ts: DateTime<Utc>, display_tz: Tz) -> u32 {
    ts.with_timezone(&display_tz).hour()
}

/// Midnight (UTC) of the calendar day the timestamp falls on. Daily ITS
/// snapshots are keyed by this value.
pub fn day_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_hms_opt(0, 0, 0).expect("valid midnight"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn off_hours_boundaries() {
        assert!(is_off_hours(6));
        assert!(!is_off_hours(7));
        assert!(!is_off_hours(18));
        assert!(is_off_hours(19));
        assert!(is_off_hours(23));
        assert!(is_off_hours(0));
    }

    #[test]
    fn display_conversion_kolkata() {
        let stored = Utc
            .from_utc_datetime(
                &NaiveDate::from_ymd_opt(2024, 6, 3)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap(),
            );
        let shown = to_display_string(stored, chrono_tz::Asia::Kolkata);
        assert_eq!(shown, "2024-06-03T14:00:00");
    }

    #[test]
    fn day_floor_truncates_to_midnight() {
        let ts = Utc
            .from_utc_datetime(
                &NaiveDate::from_ymd_opt(2024, 6, 3)
                    .unwrap()
                    .and_hms_opt(17, 45, 12)
                    .unwrap(),
            );
        let floored = day_floor(ts);
        assert_eq!(floored.to_rfc3339(), "2024-06-03T00:00:00+00:00");
    }
}
