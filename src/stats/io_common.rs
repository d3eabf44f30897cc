use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::stats::*;

pub fn column_index(header: &[String], name: &str) -> BReportResult<usize> {
    header
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .context(MissingColumnSnafu { name })
        .map_err(Box::new)
}

/// Converts a spreadsheet serial date (days since 1899-12-30) to a timestamp.
pub fn excel_serial_to_utc(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc();
    let seconds = ((serial - days) * 86400.0).round();
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let naive = base + Duration::days(days as i64) + Duration::seconds(seconds as i64);
    Some(Utc.from_utc_datetime(&naive))
}

/// Parses RFC 3339 timestamps, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
