use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::model::filter::TimeRange;
use crate::query::predicate::Predicate;

/// Fixed-width UTC format of the `create_date` column; sorts lexically.
pub const CREATE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One table scan issued against a node backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub table: String,
    pub time_range: TimeRange,
    pub predicate: Predicate,
    pub limit: usize,
}

impl ScanRequest {
    pub fn new<S: Into<String>>(table: S, time_range: TimeRange, predicate: Predicate, limit: usize) -> Self {
        Self {
            table: table.into(),
            time_range,
            predicate,
            limit,
        }
    }
}

pub fn format_create_date(ts: &DateTime<Utc>) -> String {
    ts.format(CREATE_DATE_FORMAT).to_string()
}

/// Reads a stored `create_date`, accepting the column format and RFC 3339.
pub fn parse_create_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn rfc3339_micros(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
