use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::date_util::{
    date_key, first_day_of_month, last_day_of_month, quarter_of, quarter_start_month, shift_month,
};
use crate::error::{Error, Result};

/// Range used when a request names none.
pub const DEFAULT_RANGE: &str = "thisMonth";

/// A symbolic date range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeKeyword {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    /// Fixed calendar quarter `Q1`..`Q4`.
    Quarter(u8),
    /// Anything unrecognised; resolves to the last 30 days.
    Unknown(String),
}

impl RangeKeyword {
    /// Parse a keyword, case-insensitively. Never fails.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "today" => RangeKeyword::Today,
            "yesterday" => RangeKeyword::Yesterday,
            "thisweek" => RangeKeyword::ThisWeek,
            "lastweek" => RangeKeyword::LastWeek,
            "last7days" => RangeKeyword::Last7Days,
            "last30days" => RangeKeyword::Last30Days,
            "thismonth" => RangeKeyword::ThisMonth,
            "lastmonth" => RangeKeyword::LastMonth,
            "thisquarter" => RangeKeyword::ThisQuarter,
            "lastquarter" => RangeKeyword::LastQuarter,
            "thisyear" => RangeKeyword::ThisYear,
            "lastyear" => RangeKeyword::LastYear,
            "q1" => RangeKeyword::Quarter(1),
            "q2" => RangeKeyword::Quarter(2),
            "q3" => RangeKeyword::Quarter(3),
            "q4" => RangeKeyword::Quarter(4),
            _ => RangeKeyword::Unknown(s.to_string()),
        }
    }

    /// Canonical spelling, also used as the range label.
    pub fn as_str(&self) -> &str {
        match self {
            RangeKeyword::Today => "today",
            RangeKeyword::Yesterday => "yesterday",
            RangeKeyword::ThisWeek => "thisWeek",
            RangeKeyword::LastWeek => "lastWeek",
            RangeKeyword::Last7Days => "last7Days",
            RangeKeyword::Last30Days => "last30Days",
            RangeKeyword::ThisMonth => "thisMonth",
            RangeKeyword::LastMonth => "lastMonth",
            RangeKeyword::ThisQuarter => "thisQuarter",
            RangeKeyword::LastQuarter => "lastQuarter",
            RangeKeyword::ThisYear => "thisYear",
            RangeKeyword::LastYear => "lastYear",
            RangeKeyword::Quarter(1) => "Q1",
            RangeKeyword::Quarter(2) => "Q2",
            RangeKeyword::Quarter(3) => "Q3",
            RangeKeyword::Quarter(_) => "Q4",
            RangeKeyword::Unknown(s) => s,
        }
    }

    /// Every keyword with a fixed meaning.
    pub fn all() -> Vec<RangeKeyword> {
        vec![
            RangeKeyword::Today,
            RangeKeyword::Yesterday,
            RangeKeyword::ThisWeek,
            RangeKeyword::LastWeek,
            RangeKeyword::Last7Days,
            RangeKeyword::Last30Days,
            RangeKeyword::ThisMonth,
            RangeKeyword::LastMonth,
            RangeKeyword::ThisQuarter,
            RangeKeyword::LastQuarter,
            RangeKeyword::ThisYear,
            RangeKeyword::LastYear,
            RangeKeyword::Quarter(1),
            RangeKeyword::Quarter(2),
            RangeKeyword::Quarter(3),
            RangeKeyword::Quarter(4),
        ]
    }

    /// Calendar bounds of this keyword as seen from `today`.
    pub fn bounds(&self, today: NaiveDate, quarter_year: Option<i32>) -> (NaiveDate, NaiveDate) {
        let (y, m) = (today.year(), today.month());
        match self {
            RangeKeyword::Today => (today, today),
            RangeKeyword::Yesterday => {
                let d = today - Duration::days(1);
                (d, d)
            }
            RangeKeyword::ThisWeek => {
                let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (monday, today)
            }
            RangeKeyword::LastWeek => {
                let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (monday - Duration::days(7), monday - Duration::days(1))
            }
            RangeKeyword::Last7Days => (today - Duration::days(6), today),
            RangeKeyword::Last30Days | RangeKeyword::Unknown(_) => {
                (today - Duration::days(29), today)
            }
            RangeKeyword::ThisMonth => (first_day_of_month(y, m), today),
            RangeKeyword::LastMonth => {
                let (py, pm) = shift_month(y, m, -1);
                (first_day_of_month(py, pm), last_day_of_month(py, pm))
            }
            RangeKeyword::ThisQuarter => {
                let start = quarter_start_month(quarter_of(today));
                (first_day_of_month(y, start), today)
            }
            RangeKeyword::LastQuarter => {
                let (py, pm) = shift_month(y, quarter_start_month(quarter_of(today)), -3);
                (first_day_of_month(py, pm), last_day_of_month(py, pm + 2))
            }
            RangeKeyword::ThisYear => (first_day_of_month(y, 1), today),
            RangeKeyword::LastYear => (first_day_of_month(y - 1, 1), last_day_of_month(y - 1, 12)),
            RangeKeyword::Quarter(q) => {
                let year = quarter_year.unwrap_or(y);
                let start = quarter_start_month(*q);
                (first_day_of_month(year, start), last_day_of_month(year, start + 2))
            }
        }
    }
}

impl From<&str> for RangeKeyword {
    fn from(s: &str) -> Self {
        RangeKeyword::parse(s)
    }
}

impl fmt::Display for RangeKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive calendar bounds. `start <= end` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate, label: impl Into<String>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidDateRange(format!(
                "start {} is after end {}",
                date_key(start),
                date_key(end)
            )));
        }
        Ok(Self {
            start,
            end,
            label: label.into(),
        })
    }

    /// Number of calendar days covered, inclusive.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The period of identical length ending the day before `start`.
    pub fn previous(&self) -> DateRange {
        let end = self.start - Duration::days(1);
        DateRange {
            start: end - Duration::days(self.days() - 1),
            end,
            label: format!("previous {}", self.label),
        }
    }

    pub fn start_key(&self) -> String {
        date_key(self.start)
    }

    pub fn end_key(&self) -> String {
        date_key(self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}..{})", self.label, self.start_key(), self.end_key())
    }
}

/// Resolve a request's range. Explicit bounds win over the keyword when both
/// are given.
pub fn resolve(
    keyword: &RangeKeyword,
    explicit_start: Option<NaiveDate>,
    explicit_end: Option<NaiveDate>,
    today: NaiveDate,
    quarter_year: Option<i32>,
) -> Result<DateRange> {
    match (explicit_start, explicit_end) {
        (Some(start), Some(end)) => return DateRange::new(start, end, "custom"),
        (Some(_), None) | (None, Some(_)) => {
            log::warn!("Ignoring half-open custom range; using '{keyword}'");
        }
        (None, None) => {}
    }
    if let RangeKeyword::Unknown(s) = keyword {
        log::warn!("Unknown range keyword '{s}', using last 30 days");
    }
    let (start, end) = keyword.bounds(today, quarter_year);
    DateRange::new(start, end, keyword.as_str())
}

/// Free-function form of [`DateRange::previous`].
pub fn previous_period(range: &DateRange) -> DateRange {
    range.previous()
}

/// First of the month through `today`.
pub fn month_to_date(today: NaiveDate) -> DateRange {
    DateRange {
        start: first_day_of_month(today.year(), today.month()),
        end: today,
        label: "MTD".to_string(),
    }
}

/// The same day-of-month span in the prior month, clamped to that month's end.
pub fn last_month_to_date(today: NaiveDate) -> DateRange {
    let (py, pm) = shift_month(today.year(), today.month(), -1);
    let last = last_day_of_month(py, pm);
    let end = NaiveDate::from_ymd_opt(py, pm, today.day()).unwrap_or(last);
    DateRange {
        start: first_day_of_month(py, pm),
        end,
        label: "LMTD".to_string(),
    }
}

pub fn year_to_date(today: NaiveDate) -> DateRange {
    DateRange {
        start: first_day_of_month(today.year(), 1),
        end: today,
        label: "YTD".to_string(),
    }
}
