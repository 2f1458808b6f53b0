use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::{CrontabError, Result};
use crate::field::{CrontabField, MAX_YEAR};
use crate::filter::{FieldFilter, FilterKind};
use crate::format::CronFormat;
use crate::parser::{self, FilterSet};

/// The Gregorian calendar repeats every 400 years.
const CALENDAR_CYCLE_YEARS: i32 = 400;

/// A parsed calendar expression.
///
/// Owns one list of [`FieldFilter`]s per field present in its
/// [`CronFormat`]. All evaluation happens in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crontab {
    format: CronFormat,
    filters: FilterSet,
}

impl Crontab {
    /// Parse `text` with an explicit format.
    ///
    /// An `@macro` is accepted only when its expansion has `format`; use
    /// [`FromStr`] to take whatever format the macro expands to.
    pub fn parse(text: &str, format: CronFormat) -> Result<Self> {
        let text = text.trim();
        if text.starts_with('@') {
            let crontab = Self::from_macro(text)?;
            if crontab.format != format {
                return Err(CrontabError::MacroFormat {
                    name: text.to_string(),
                    format,
                    actual: crontab.format,
                });
            }
            return Ok(crontab);
        }
        let filters = parser::parse_fields(text, format)?;
        Ok(Self { format, filters })
    }

    fn from_macro(name: &str) -> Result<Self> {
        let (expansion, format) = parser::expand_macro(name)?;
        let filters = parser::parse_fields(expansion, format)?;
        Ok(Self { format, filters })
    }

    /// Like [`parse`](Self::parse) but discards the error.
    pub fn try_parse(text: &str, format: CronFormat) -> Option<Self> {
        Self::parse(text, format).ok()
    }

    pub fn format(&self) -> CronFormat {
        self.format
    }

    /// Alternatives for `field`, or `None` when the format omits it.
    pub fn filters(&self, field: CrontabField) -> Option<&[FieldFilter]> {
        self.filters.get(&field).map(Vec::as_slice)
    }

    /// True when every field accepts the instant. Fields absent from the
    /// format are pinned to zero (seconds) or unconstrained (year).
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        if !self.format.has_seconds() && at.second() != 0 {
            return false;
        }
        self.filters
            .values()
            .all(|alternatives| alternatives.iter().any(|f| f.matches(&at)))
    }

    /// First matching instant strictly after `from`, if any exists before year 10000.
    pub fn next_occurrence(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_naive(from.naive_utc(), far_future())
            .map(|next| next.and_utc())
    }

    /// First matching instant strictly after `from`, or `until` itself when
    /// nothing matches at or before it.
    pub fn next_occurrence_until(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> DateTime<Utc> {
        self.next_naive(from.naive_utc(), until.naive_utc())
            .map(|next| next.and_utc())
            .unwrap_or(until)
    }

    /// Every matching instant in `(from, until]`, in order.
    pub fn occurrences(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Occurrences<'_> {
        Occurrences {
            crontab: self,
            cursor: from.naive_utc(),
            until: until.naive_utc(),
        }
    }

    /// Time left from `from` until the next occurrence.
    pub fn sleep_duration(&self, from: DateTime<Utc>) -> Option<std::time::Duration> {
        let next = self.next_occurrence(from)?;
        Some((next - from).to_std().unwrap_or_default())
    }

    fn next_naive(&self, from: NaiveDateTime, until: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut candidate = self.first_candidate(from)?;
        let horizon = candidate.year().saturating_add(CALENDAR_CYCLE_YEARS);
        let year_constrained = self.year_constrained();

        loop {
            if candidate > until || candidate.year() > MAX_YEAR {
                return None;
            }
            if !year_constrained && candidate.year() > horizon {
                return None;
            }

            let date = candidate.date();
            let year = date.year();
            match self.at_or_after(CrontabField::Year, year) {
                None => return None,
                Some(next_year) if next_year != year => {
                    candidate = start_of_year(next_year)?;
                    continue;
                }
                Some(_) => {}
            }

            if !self.month_accepts(date.month()) {
                candidate = start_of_next_month(date)?;
                continue;
            }

            if !self.date_matches(date) {
                candidate = start_of_next_day(date)?;
                continue;
            }

            match self.time_at_or_after(candidate.time()) {
                Some(time) => {
                    let found = date.and_time(time);
                    return (found <= until).then_some(found);
                }
                None => candidate = start_of_next_day(date)?,
            }
        }
    }

    /// Drop the components the format cannot express, then step one unit past `from`.
    fn first_candidate(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let second = if self.format.has_seconds() { from.second() } else { 0 };
        let base = from.date().and_hms_opt(from.hour(), from.minute(), second)?;
        let step = if self.format.has_seconds() {
            Duration::seconds(1)
        } else {
            Duration::minutes(1)
        };
        base.checked_add_signed(step)
    }

    /// Earliest time of day at or after `time` accepted by the hour, minute
    /// and second filters. `None` when the day overflows.
    fn time_at_or_after(&self, time: NaiveTime) -> Option<NaiveTime> {
        let mut hour = time.hour() as i32;
        let mut minute = time.minute() as i32;
        let mut second = time.second() as i32;

        loop {
            let h = self.at_or_after(CrontabField::Hour, hour)?;
            if h != hour {
                hour = h;
                minute = 0;
                second = 0;
            }

            let Some(m) = self.at_or_after(CrontabField::Minute, minute) else {
                hour += 1;
                minute = 0;
                second = 0;
                if hour > CrontabField::Hour.max() {
                    return None;
                }
                continue;
            };
            if m != minute {
                minute = m;
                second = 0;
            }

            let Some(s) = self.at_or_after(CrontabField::Second, second) else {
                minute += 1;
                second = 0;
                if minute > CrontabField::Minute.max() {
                    minute = 0;
                    hour += 1;
                    if hour > CrontabField::Hour.max() {
                        return None;
                    }
                }
                continue;
            };

            return NaiveTime::from_hms_opt(hour as u32, minute as u32, s as u32);
        }
    }

    /// Smallest accepted value `>= value` on an incrementable field.
    fn at_or_after(&self, field: CrontabField, value: i32) -> Option<i32> {
        let Some(alternatives) = self.filters.get(&field) else {
            return match field {
                CrontabField::Year => Some(value),
                _ => (value == 0).then_some(0),
            };
        };
        if alternatives.iter().any(|f| f.accepts(value)) {
            return Some(value);
        }
        alternatives
            .iter()
            .filter_map(|f| f.next_value(value).ok().flatten())
            .min()
    }

    fn month_accepts(&self, month: u32) -> bool {
        self.filters
            .get(&CrontabField::Month)
            .map_or(true, |alternatives| alternatives.iter().any(|f| f.accepts(month as i32)))
    }

    /// Day, weekday, month and year filters evaluated together on one date.
    fn date_matches(&self, date: NaiveDate) -> bool {
        let midnight = date.and_time(NaiveTime::MIN);
        [
            CrontabField::Day,
            CrontabField::DayOfWeek,
            CrontabField::Month,
            CrontabField::Year,
        ]
        .into_iter()
        .all(|field| {
            self.filters
                .get(&field)
                .map_or(true, |alternatives| alternatives.iter().any(|f| f.matches(&midnight)))
        })
    }

    fn year_constrained(&self) -> bool {
        self.filters.get(&CrontabField::Year).is_some_and(|alternatives| {
            !alternatives.iter().any(|f| matches!(f.kind(), FilterKind::Any))
        })
    }
}

impl fmt::Display for Crontab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.format.fields().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let Some(alternatives) = self.filters.get(field) else {
                continue;
            };
            for (j, filter) in alternatives.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{filter}")?;
            }
        }
        Ok(())
    }
}

/// Parses with the format inferred from the field count (5, 6 or 7).
impl FromStr for Crontab {
    type Err = CrontabError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.starts_with('@') {
            return Self::from_macro(text);
        }
        let count = text.split_whitespace().count();
        if count == 0 {
            return Err(CrontabError::Empty);
        }
        let format = CronFormat::detect(count).ok_or(CrontabError::FieldCount {
            format: CronFormat::Standard,
            expected: CronFormat::Standard.field_count(),
            found: count,
        })?;
        Self::parse(text, format)
    }
}

/// Iterator returned by [`Crontab::occurrences`].
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    crontab: &'a Crontab,
    cursor: NaiveDateTime,
    until: NaiveDateTime,
}

impl Iterator for Occurrences<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.crontab.next_naive(self.cursor, self.until)?;
        self.cursor = next;
        Some(next.and_utc())
    }
}

fn far_future() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(MAX_YEAR, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .unwrap_or(NaiveDateTime::MAX)
}

fn start_of_year(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.succ_opt()?.and_hms_opt(0, 0, 0)
}
