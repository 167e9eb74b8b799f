//! Calendar periods: inclusive date ranges and year-months.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRange {
    #[error("range start {start} is after end {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },

    #[error("invalid month '{0}' (expected YYYY-MM)")]
    BadMonth(String),
}

/// Inclusive range of calendar days, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawRange> for DateRange {
    type Error = InvalidRange;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl From<DateRange> for RawRange {
    fn from(r: DateRange) -> Self {
        RawRange {
            start: r.start,
            end: r.end,
        }
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// A single day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// The `days` calendar days ending at `end` (inclusive). `days == 0` is
    /// treated as one day. The start saturates at `NaiveDate::MIN`.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end
                .checked_sub_signed(Duration::days(span))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// First instant of the range (start day, 00:00 UTC).
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant after the range (day after end, 00:00 UTC). Saturates at
    /// `NaiveDateTime::MAX` when the range ends on the last representable day.
    pub fn end_instant_exclusive(&self) -> DateTime<Utc> {
        match self.end.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN).and_utc(),
            None => NaiveDateTime::MAX.and_utc(),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_instant() && ts < self.end_instant_exclusive()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A calendar month, e.g. `2024-03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidRange> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(InvalidRange::BadMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// All days of the month.
    pub fn range(&self) -> DateRange {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN);
        let next_first = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        }
        .unwrap_or(NaiveDate::MAX);
        DateRange {
            start: first,
            end: next_first.pred_opt().unwrap_or(first),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = InvalidRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidRange::BadMonth(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(bad)?;
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        YearMonth::new(year, month).map_err(|_| bad())
    }
}

impl TryFrom<String> for YearMonth {
    type Error = InvalidRange;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<YearMonth> for String {
    fn from(m: YearMonth) -> Self {
        m.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(DateRange::new(d(2024, 2, 1), d(2024, 1, 1)).is_err());
        assert!(DateRange::new(d(2024, 1, 1), d(2024, 1, 1)).is_ok());
    }

    #[test]
    fn trailing_window_is_inclusive() {
        let r = DateRange::trailing(d(2024, 1, 30), 30);
        assert_eq!(r.start(), d(2024, 1, 1));
        assert_eq!(r.days(), 30);
    }

    #[test]
    fn contains_uses_whole_days() {
        let r = DateRange::day(d(2024, 1, 2));
        assert!(r.contains(d(2024, 1, 2).and_hms_opt(23, 59, 59).unwrap().and_utc()));
        assert!(!r.contains(d(2024, 1, 3).and_hms_opt(0, 0, 0).unwrap().and_utc()));
    }

    #[test]
    fn extreme_dates_saturate_instead_of_panicking() {
        let r = DateRange::trailing(NaiveDate::MIN, 30);
        assert_eq!(r.start(), NaiveDate::MIN);
        assert_eq!(r.days(), 1);

        let last = DateRange::day(NaiveDate::MAX);
        assert_eq!(last.end_instant_exclusive(), NaiveDateTime::MAX.and_utc());
        assert!(last.contains(NaiveDate::MAX.and_hms_opt(12, 0, 0).unwrap().and_utc()));
    }

    #[test]
    fn month_range_handles_december_and_leap_years() {
        let feb: YearMonth = "2024-02".parse().unwrap();
        assert_eq!(feb.range().end(), d(2024, 2, 29));
        let dec = YearMonth::new(2023, 12).unwrap();
        assert_eq!(dec.range().end(), d(2023, 12, 31));
        assert_eq!(dec.to_string(), "2023-12");
    }

    #[test]
    fn bad_months_rejected() {
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("march".parse::<YearMonth>().is_err());
    }

    #[test]
    fn serde_enforces_ordering() {
        let ok: DateRange = serde_json::from_str(r#"{"start":"2024-01-01","end":"2024-01-31"}"#).unwrap();
        assert_eq!(ok.days(), 31);
        let bad = serde_json::from_str::<DateRange>(r#"{"start":"2024-02-01","end":"2024-01-31"}"#);
        assert!(bad.is_err());
    }
}
