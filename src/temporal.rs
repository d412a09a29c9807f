// Calendar helpers for the stage report
//
// All timestamps are UTC. A reporting month covers its first day from
// 00:00:00 through its last day at 23:59:59.999999, both ends inclusive.

use crate::error::{ReportError, Result};
use chrono::{DateTime, Datelike, Month, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text format of timestamp columns; fixed width so that lexicographic
/// order in SQLite equals chronological order
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Whole-second prefix shared by every stored timestamp, with or without
/// a fractional part
pub const SECOND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// TIME WINDOW
// ============================================================================

/// Optional inclusive bounds on `occurred_at`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        TimeWindow::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeWindow {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Window covering one calendar month
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let (start, end) = month_bounds(year, month)?;
        Ok(TimeWindow::between(start, end))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| from <= at) && self.to.map_or(true, |to| at <= to)
    }
}

// ============================================================================
// MONTH ARITHMETIC
// ============================================================================

/// First and last instant of `(year, month)`
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || ReportError::InvalidPeriod { year, month };

    let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let last_day = last_day_of_month(first_day).ok_or_else(invalid)?;

    let start = first_day.and_time(NaiveTime::MIN).and_utc();
    let end_of_day = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).ok_or_else(invalid)?;
    let end = last_day.and_time(end_of_day).and_utc();

    Ok((start, end))
}

fn last_day_of_month(first_day: NaiveDate) -> Option<NaiveDate> {
    let (next_year, next_month) = if first_day.month() == 12 {
        (first_day.year() + 1, 1)
    } else {
        (first_day.year(), first_day.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Full English month name ("March"); `None` outside 1..=12
pub fn month_name(month: u32) -> Option<&'static str> {
    let number = u8::try_from(month).ok()?;
    Month::try_from(number).ok().map(|m| m.name())
}

// ============================================================================
// MONTH SELECTION (report form)
// ============================================================================

/// Month choice of the report form: form value "0" means all months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthSelection {
    All,
    Month(u32),
}

impl MonthSelection {
    /// Parse a numeric form value
    pub fn from_number(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MonthSelection::All),
            1..=12 => Ok(MonthSelection::Month(value)),
            _ => Err(ReportError::InvalidMonth(value.to_string())),
        }
    }

    /// Parse the string form value ("0".."12")
    pub fn from_form_value(value: &str) -> Result<Self> {
        let number: u32 = value
            .trim()
            .parse()
            .map_err(|_| ReportError::InvalidMonth(value.to_string()))?;
        Self::from_number(number)
    }

    pub fn form_value(&self) -> u32 {
        match self {
            MonthSelection::All => 0,
            MonthSelection::Month(m) => *m,
        }
    }

    pub fn as_option(&self) -> Option<u32> {
        match self {
            MonthSelection::All => None,
            MonthSelection::Month(m) => Some(*m),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MonthSelection::All => "All Months",
            MonthSelection::Month(m) => month_name(*m).unwrap_or("Unknown"),
        }
    }

    /// All 13 choices in form order
    pub fn choices() -> Vec<MonthSelection> {
        std::iter::once(MonthSelection::All)
            .chain((1..=12).map(MonthSelection::Month))
            .collect()
    }
}

impl fmt::Display for MonthSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// STORAGE ENCODING
// ============================================================================

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(STORAGE_FORMAT).to_string()
}

/// Timestamp truncated to whole seconds, in `SECOND_FORMAT`
pub fn format_second(at: DateTime<Utc>) -> String {
    at.format(SECOND_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ReportError::Timestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
