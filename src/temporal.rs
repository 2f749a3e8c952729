// ⏰ Temporal Helpers - dates from cells and from file names
//
// Two sources of time:
// 1. Violation date: the cell on each incident row (many notations)
// 2. Report date: the month/day embedded in the source file name, used to
//    stamp partially merged records

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// MONTH / DAY CODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1..=31).contains(&day) {
            Some(MonthDay { month, day })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        MonthDay {
            month: date.month(),
            day: date.day(),
        }
    }

    /// "MMDD" suffix used in output file names
    pub fn code(&self) -> String {
        format!("{:02}{:02}", self.month, self.day)
    }

    /// Combine with a year; days past the end of the month are clamped
    /// (02-30 → 02-28/29)
    pub fn with_year(&self, year: i32) -> NaiveDate {
        (1..=self.day)
            .rev()
            .find_map(|day| NaiveDate::from_ymd_opt(year, self.month, day))
            .unwrap_or_default()
    }
}

struct FileNamePattern {
    regex: Regex,
    /// Capture index of the month; day follows it
    month_group: usize,
}

fn file_name_patterns() -> &'static [FileNamePattern] {
    static PATTERNS: OnceLock<Vec<FileNamePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(\d{1,2})月(\d{1,2})日", 1),
            (r"(\d{1,2})-(\d{1,2})", 1),
            (r"(\d{4})(\d{2})(\d{2})", 2),
            (r"(\d{2})(\d{2})", 1),
        ]
        .into_iter()
        .filter_map(|(pattern, month_group)| {
            Regex::new(pattern).ok().map(|regex| FileNamePattern { regex, month_group })
        })
        .collect()
    })
}

/// Month/day from a file name; the first plausible hit of the first pattern
/// that has one wins, otherwise `today`
///
/// Accepted notations: `3月15日`, `03-15`, `20250315`, `0315`.
/// Implausible hits are skipped (`details_2025_0315.csv` → 03-15).
pub fn extract_month_day(file_name: &str, today: NaiveDate) -> MonthDay {
    file_name_patterns()
        .iter()
        .find_map(|pattern| {
            pattern.regex.captures_iter(file_name).find_map(|caps| {
                let month = caps.get(pattern.month_group)?.as_str().parse().ok()?;
                let day = caps.get(pattern.month_group + 1)?.as_str().parse().ok()?;
                MonthDay::new(month, day)
            })
        })
        .unwrap_or_else(|| MonthDay::from_date(today))
}

// ============================================================================
// YEAR MODE
// ============================================================================

/// Most frequent year among the dates; ties go to the latest year
pub fn year_mode<'a, I>(dates: I, fallback_year: i32) -> i32
where
    I: IntoIterator<Item = &'a NaiveDate>,
{
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for date in dates {
        *counts.entry(date.year()).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|(year_a, count_a), (year_b, count_b)| {
            count_a.cmp(count_b).then(year_a.cmp(year_b))
        })
        .map(|(year, _)| year)
        .unwrap_or(fallback_year)
}

// ============================================================================
// CELL DATES
// ============================================================================

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a violation date cell; `None` when the value is empty or unparseable
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }

    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        let year = value[0..4].parse().ok()?;
        let month = value[4..6].parse().ok()?;
        let day = value[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    parse_serial_date(value)
}

/// Spreadsheet serial day number (1900 date system, epoch 1899-12-30)
fn parse_serial_date(value: &str) -> Option<NaiveDate> {
    let serial: f64 = value.parse().ok()?;
    // Plausible range: 1950..2100
    if !(18_264.0..=73_050.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

// ============================================================================
// TESTS
// ============================================================================
