//! Date and time parsing for portal and API data.
//!
//! Raw timestamps arrive in several shapes (ISO with or without seconds,
//! dotted day-first dates, values decorated with `*` markers). Parsers here
//! return `None` for anything unreadable so callers can drop bad rows.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

static NOT_DATETIME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9:\- ]").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];

/// Parses a timestamp in any of the accepted layouts.
///
/// Date-only values resolve to midnight.
#[must_use]
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_date_only(value).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Parses a date, accepting full timestamps too.
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    parse_date_only(value).or_else(|| parse_datetime(value).map(|dt| dt.date()))
}

fn parse_date_only(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Cleans a decorated service-log timestamp and parses it.
///
/// `*` markers become spaces and every character outside digits, `:`, `-`
/// and space is dropped before parsing.
#[must_use]
pub fn clean_datetime(raw: &str) -> Option<NaiveDateTime> {
    let spaced = raw.replace('*', " ");
    let stripped = NOT_DATETIME_CHARS.replace_all(&spaced, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&collapsed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&collapsed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| parse_datetime(raw))
}

/// Parses a clock time (`HH:MM:SS` or `HH:MM`).
#[must_use]
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let value = raw.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
        .or_else(|| parse_datetime(value).map(|dt| dt.time()))
}

/// Returns the first and last day of the month before `today`.
#[must_use]
pub fn previous_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_this = today.with_day(1).unwrap_or(today);
    let last_prev = first_this - Duration::days(1);
    let first_prev = last_prev.with_day(1).unwrap_or(last_prev);
    (first_prev, last_prev)
}

/// Formats a timestamp the way every output table stores it.
#[must_use]
pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Formats a date as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

/// Formats a clock time as `HH:MM:SS`.
#[must_use]
pub fn format_time(value: NaiveTime) -> String {
    value.format("%H:%M:%S").to_string()
}
