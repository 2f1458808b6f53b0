//! Calendar fields and the small amount of calendar arithmetic the filters need.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Largest year the calculator will consider. Anything later is treated as "never".
pub const MAX_YEAR: i32 = 9999;
pub const MIN_YEAR: i32 = 1;

pub(crate) const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

pub(crate) const WEEKDAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// One column of a crontab expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrontabField {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    DayOfWeek,
    Year,
}

impl CrontabField {
    pub const fn min(self) -> i32 {
        match self {
            Self::Second | Self::Minute | Self::Hour | Self::DayOfWeek => 0,
            Self::Day | Self::Month => 1,
            Self::Year => MIN_YEAR,
        }
    }

    pub const fn max(self) -> i32 {
        match self {
            Self::Second | Self::Minute => 59,
            Self::Hour => 23,
            Self::Day => 31,
            Self::Month => 12,
            Self::DayOfWeek => 6,
            Self::Year => MAX_YEAR,
        }
    }

    /// Largest value accepted in expression text. Day-of-week also takes 7 for Sunday.
    pub(crate) const fn max_accepted(self) -> i32 {
        match self {
            Self::DayOfWeek => 7,
            other => other.max(),
        }
    }

    /// Fields whose next value can be computed without calendar context.
    pub const fn is_incrementable(self) -> bool {
        matches!(self, Self::Second | Self::Minute | Self::Hour | Self::Year)
    }

    /// Extract this field's value from a calendar instant.
    pub fn value_of(self, dt: &NaiveDateTime) -> i32 {
        match self {
            Self::Second => dt.second() as i32,
            Self::Minute => dt.minute() as i32,
            Self::Hour => dt.hour() as i32,
            Self::Day => dt.day() as i32,
            Self::Month => dt.month() as i32,
            Self::DayOfWeek => dt.weekday().num_days_from_sunday() as i32,
            Self::Year => dt.year(),
        }
    }

    pub(crate) fn names(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Month => Some(&MONTH_NAMES),
            Self::DayOfWeek => Some(&WEEKDAY_NAMES),
            _ => None,
        }
    }

    /// Numeric value of a month or weekday name, case-insensitive prefix match.
    ///
    /// Returns `Ok(None)` for fields without names, and the list of matching
    /// names when the prefix is ambiguous.
    pub(crate) fn resolve_name(self, token: &str) -> Result<Option<i32>, NameLookup> {
        let Some(names) = self.names() else {
            return Ok(None);
        };
        let needle = token.to_ascii_lowercase();
        let hits: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with(&needle))
            .map(|(i, _)| i)
            .collect();

        match hits.as_slice() {
            [] => Err(NameLookup::Unknown),
            [index] => {
                let offset = if self == Self::Month { 1 } else { 0 };
                Ok(Some(*index as i32 + offset))
            }
            many => Err(NameLookup::Ambiguous(
                many.iter().map(|i| names[*i]).collect::<Vec<_>>().join(", "),
            )),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for CrontabField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameLookup {
    Unknown,
    Ambiguous(String),
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Longest possible length of `month` across all years.
pub(crate) fn max_days_in_month(month: u32) -> u32 {
    if month == 2 {
        29
    } else {
        days_in_month(2001, month)
    }
}

/// 0 = Sunday … 6 = Saturday.
pub(crate) fn weekday_of(year: i32, month: u32, day: u32) -> Option<u32> {
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.weekday().num_days_from_sunday())
}

/// Business day closest to the last day of the month.
///
/// Saturday moves back one day. Sunday would move forward into the next
/// month, so it falls back to the preceding Friday instead.
pub(crate) fn last_weekday_of_month(year: i32, month: u32) -> Option<u32> {
    let last = days_in_month(year, month);
    match weekday_of(year, month, last)? {
        6 => Some(last - 1),
        0 => Some(last - 2),
        _ => Some(last),
    }
}

/// Business day closest to `day`, never leaving the month.
///
/// `None` when the month is shorter than `day`.
pub(crate) fn nearest_weekday(year: i32, month: u32, day: u32) -> Option<u32> {
    let last = days_in_month(year, month);
    if day == 0 || day > last {
        return None;
    }
    match weekday_of(year, month, day)? {
        6 if day == 1 => Some(3),
        6 => Some(day - 1),
        0 if day == last => Some(day - 2),
        0 => Some(day + 1),
        _ => Some(day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_table() {
        assert_eq!((CrontabField::Second.min(), CrontabField::Second.max()), (0, 59));
        assert_eq!((CrontabField::Hour.min(), CrontabField::Hour.max()), (0, 23));
        assert_eq!((CrontabField::Day.min(), CrontabField::Day.max()), (1, 31));
        assert_eq!((CrontabField::Month.min(), CrontabField::Month.max()), (1, 12));
        assert_eq!((CrontabField::DayOfWeek.min(), CrontabField::DayOfWeek.max()), (0, 6));
        assert_eq!(CrontabField::DayOfWeek.max_accepted(), 7);
    }

    #[test]
    fn name_prefixes() {
        assert_eq!(CrontabField::Month.resolve_name("jan"), Ok(Some(1)));
        assert_eq!(CrontabField::Month.resolve_name("DECEMBER"), Ok(Some(12)));
        assert_eq!(CrontabField::DayOfWeek.resolve_name("Sun"), Ok(Some(0)));
        assert_eq!(CrontabField::DayOfWeek.resolve_name("sa"), Ok(Some(6)));
        assert_eq!(CrontabField::Hour.resolve_name("noon"), Ok(None));
    }

    #[test]
    fn ambiguous_and_unknown_names() {
        assert!(matches!(
            CrontabField::Month.resolve_name("ju"),
            Err(NameLookup::Ambiguous(ref s)) if s == "june, july"
        ));
        assert!(matches!(CrontabField::DayOfWeek.resolve_name("t"), Err(NameLookup::Ambiguous(_))));
        assert_eq!(CrontabField::Month.resolve_name("smarch"), Err(NameLookup::Unknown));
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2023, 4), 30);
        assert_eq!(days_in_month(2023, 12), 31);
    }

    #[test]
    fn last_weekday_adjustments() {
        // 2023-09-30 is a Saturday.
        assert_eq!(last_weekday_of_month(2023, 9), Some(29));
        // 2023-12-31 is a Sunday; Monday would be in January.
        assert_eq!(last_weekday_of_month(2023, 12), Some(29));
        // 2023-10-31 is a Tuesday.
        assert_eq!(last_weekday_of_month(2023, 10), Some(31));
    }

    #[test]
    fn nearest_weekday_stays_in_month() {
        // 2023-10-15 is a Sunday.
        assert_eq!(nearest_weekday(2023, 10, 15), Some(16));
        // 2023-07-01 is a Saturday: Friday would be June, so Monday the 3rd.
        assert_eq!(nearest_weekday(2023, 7, 1), Some(3));
        // 2023-04-30 is a Sunday: Monday would be May, so Friday the 28th.
        assert_eq!(nearest_weekday(2023, 4, 30), Some(28));
        // 2023-10-14 is a Saturday.
        assert_eq!(nearest_weekday(2023, 10, 14), Some(13));
        assert_eq!(nearest_weekday(2023, 2, 30), None);
    }
}
