use std::time::SystemTime;
use time::{Date, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

pub mod health;
pub mod phase;
pub mod routines;
pub mod session;
pub mod sse;
pub mod ws;

use time::format_description::well_known::Rfc3339;

/// Calendar-day format used in snapshots and the durable store (`YYYY-MM-DD`).
const DAY_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Render a timestamp as RFC 3339 for wire payloads.
pub fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Render a competition day as its canonical `YYYY-MM-DD` string.
pub fn format_day(day: Date) -> String {
    day.format(DAY_FORMAT)
        .unwrap_or_else(|_| "invalid-day".into())
}

/// Parse a `YYYY-MM-DD` competition day string.
pub fn parse_day(value: &str) -> Result<Date, time::error::Parse> {
    Date::parse(value, DAY_FORMAT)
}

/// Today's competition day (UTC wall clock).
pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn day_round_trip() {
        let day = date!(2026 - 08 - 07);
        assert_eq!(format_day(day), "2026-08-07");
        assert_eq!(parse_day("2026-08-07").unwrap(), day);
        assert!(parse_day("08/07/2026").is_err());
    }
}
