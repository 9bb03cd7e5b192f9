use crate::errors::TrackerError;
use chrono::{Datelike, Duration, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A timezone-less calendar day, canonically written as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// The caller's local calendar day.
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, TrackerError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| TrackerError::InvalidDateFormat(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Strict parse: exactly four year digits, two month digits and two day digits.
    pub fn parse(input: &str) -> Result<Self, TrackerError> {
        let invalid = || TrackerError::InvalidDateFormat(input.to_string());
        let bytes = input.as_bytes();
        if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
            return Err(invalid());
        }
        let digits = |range: std::ops::Range<usize>| -> Result<u32, TrackerError> {
            let part = &input[range];
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };
        let year = digits(0..4)?;
        let month = digits(5..7)?;
        let day = digits(8..10)?;
        NaiveDate::from_ymd_opt(year as i32, month, day)
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Parses a `YYYY-MM` month into its first day.
    pub fn parse_month(input: &str) -> Result<Self, TrackerError> {
        if input.len() != 7 {
            return Err(TrackerError::InvalidDateFormat(input.to_string()));
        }
        Self::parse(&format!("{input}-01")).map_err(|_| TrackerError::InvalidDateFormat(input.to_string()))
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// Saturates at the representable range instead of overflowing.
    pub fn add_days(&self, days: i64) -> Self {
        let shifted = Duration::try_days(days).and_then(|delta| self.0.checked_add_signed(delta));
        match shifted {
            Some(date) => Self(date),
            None if days < 0 => Self(NaiveDate::MIN),
            None => Self(NaiveDate::MAX),
        }
    }

    /// Month arithmetic clamps the day to the last day of the target month,
    /// so Jan 31 + 1 month is Feb 28 (or 29).
    pub fn add_months(&self, months: i32) -> Self {
        let magnitude = Months::new(months.unsigned_abs());
        let shifted = if months >= 0 {
            self.0.checked_add_months(magnitude)
        } else {
            self.0.checked_sub_months(magnitude)
        };
        match shifted {
            Some(date) => Self(date),
            None if months < 0 => Self(NaiveDate::MIN),
            None => Self(NaiveDate::MAX),
        }
    }

    /// Whole calendar days from `self` to `other` (positive when `other` is later).
    pub fn days_until(&self, other: &DateKey) -> i64 {
        (other.0 - self.0).num_days()
    }

    /// Monday of the ISO week containing this day.
    pub fn week_start(&self) -> Self {
        self.add_days(-(self.0.weekday().num_days_from_monday() as i64))
    }

    pub fn month_start(&self) -> Self {
        self.add_days(-(self.0.day0() as i64))
    }

    /// `YYYY-Www`
    pub fn iso_week_label(&self) -> String {
        let iso = self.0.iso_week();
        format!("{}-W{:02}", iso.year(), iso.week())
    }

    /// `YYYY-MM`, the key budgets and monthly reports use.
    pub fn month_label(&self) -> String {
        self.0.format("%Y-%m").to_string()
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DateKey {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DateKey {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DateKey> for String {
    fn from(key: DateKey) -> Self {
        key.to_string()
    }
}
