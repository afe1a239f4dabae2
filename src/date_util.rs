use chrono::{Datelike, Duration, NaiveDate};

use crate::error::{Error, Result};

/// Get the first day of a given month.
pub fn first_day_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap() - Duration::days(1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap() - Duration::days(1)
    }
}

/// Get the quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    (d.month0() / 3 + 1) as u8
}

/// First month (1-based) of a quarter: the block starting at month index `q0 * 3`.
pub fn quarter_start_month(quarter: u8) -> u32 {
    (quarter as u32 - 1) * 3 + 1
}

/// Step `(year, month)` by `delta` calendar months.
pub fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = year * 12 + month as i32 - 1 + delta;
    (idx.div_euclid(12), (idx.rem_euclid(12) + 1) as u32)
}

/// Every `(year, month)` touched by the inclusive range `start..=end`.
pub fn months_spanned(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32)> {
    let mut out = Vec::new();
    let (mut y, mut m) = (start.year(), start.month());
    while (y, m) <= (end.year(), end.month()) {
        out.push((y, m));
        (y, m) = shift_month(y, m, 1);
    }
    out
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::DateParse(format!("expected YYYY-MM-DD, got '{s}'")))
}

/// Format a date as the `YYYY-MM-DD` text bound into warehouse queries.
pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}
