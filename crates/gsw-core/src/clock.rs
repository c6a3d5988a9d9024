//! Wall-clock formatting shared by the persistence files and the web API.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// On-disk and API timestamp format.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a permanent ban's unban time is written to disk.
pub const NEVER_STAMP: &str = "0000-00-00 00:00:00";

/// Sentinel strictly greater than any real clock reading.
///
/// Permanent bans carry this as their unban time so the sweeper's
/// `unbans_at <= now` comparison never fires for them.
pub fn never() -> DateTime<Local> {
    Local
        .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .earliest()
        .expect("sentinel timestamp is representable in every timezone")
}

pub fn is_never(stamp: DateTime<Local>) -> bool {
    stamp == never()
}

pub fn format_stamp(stamp: DateTime<Local>) -> String {
    if is_never(stamp) {
        NEVER_STAMP.to_string()
    } else {
        stamp.format(TIME_FORMAT).to_string()
    }
}

/// Parse a stamp written by [`format_stamp`]. `None` on malformed input.
pub fn parse_stamp(text: &str) -> Option<DateTime<Local>> {
    if text == NEVER_STAMP {
        return Some(never());
    }
    let naive = NaiveDateTime::parse_from_str(text, TIME_FORMAT).ok()?;
    naive.and_local_timezone(Local).earliest()
}

/// Today's date at the given time of day. `None` when out of range.
pub fn today_at(hour: u32, minute: u32, second: u32) -> Option<DateTime<Local>> {
    Local::now()
        .date_naive()
        .and_hms_opt(hour, minute, second)?
        .and_local_timezone(Local)
        .earliest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_beyond_any_real_reading() {
        assert!(never() > Local::now());
    }

    #[test]
    fn round_trips_to_second_precision() {
        let now = Local::now();
        let parsed = parse_stamp(&format_stamp(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn sentinel_round_trips() {
        assert_eq!(format_stamp(never()), NEVER_STAMP);
        assert_eq!(parse_stamp(NEVER_STAMP), Some(never()));
    }

    #[test]
    fn malformed_stamp_is_none() {
        assert_eq!(parse_stamp("not a time"), None);
        assert_eq!(parse_stamp("2026-13-01 00:00:00"), None);
    }

    #[test]
    fn today_at_rejects_out_of_range() {
        assert!(today_at(25, 0, 0).is_none());
        assert!(today_at(12, 34, 56).is_some());
    }
}
