//! Per-field matchers. A parsed expression owns one `Vec<FieldFilter>` per
//! field; the alternatives in that vector are OR'd together.

use std::fmt;

use chrono::{Datelike, NaiveDateTime};

use crate::error::{CrontabError, Result};
use crate::field::{self, CrontabField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// `*`
    Any,
    /// `a`
    Specific(i32),
    /// `a` on the year field, which has no meaningful upper bound.
    SpecificYear(i32),
    /// `a-b`
    Range { start: i32, end: i32 },
    /// `*/n`, `a/n`, `a-b/n`. `end` is `None` when the step runs to the field max.
    Step {
        start: i32,
        end: Option<i32>,
        step: i32,
    },
    /// `L` (day)
    LastDayOfMonth,
    /// `LW` (day)
    LastWeekdayOfMonth,
    /// `nW` (day)
    NearestWeekday(u32),
    /// `d#n` (day-of-week)
    NthWeekdayInMonth { weekday: u32, nth: u32 },
    /// `dL` (day-of-week)
    LastWeekdayInMonth(u32),
    /// `?` (day or day-of-week)
    NoConstraint,
}

/// One alternative of one field.
///
/// Range and step filters expand their satisfying values once at
/// construction; `values` is sorted, deduplicated and day-of-week 7 is
/// already folded into 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    field: CrontabField,
    kind: FilterKind,
    values: Vec<i32>,
}

impl FieldFilter {
    pub fn any(field: CrontabField) -> Self {
        Self { field, kind: FilterKind::Any, values: Vec::new() }
    }

    pub fn specific(field: CrontabField, value: i32) -> Result<Self> {
        let value = normalize(field, check_bounds(field, value)?);
        let kind = if field == CrontabField::Year {
            FilterKind::SpecificYear(value)
        } else {
            FilterKind::Specific(value)
        };
        Ok(Self { field, kind, values: Vec::new() })
    }

    pub fn range(field: CrontabField, start: i32, end: i32) -> Result<Self> {
        check_bounds(field, start)?;
        check_bounds(field, end)?;
        if start > end {
            return Err(CrontabError::InvalidToken {
                field,
                token: format!("{start}-{end}"),
                reason: "range start is greater than its end".to_string(),
            });
        }
        let values = expand(field, start, end, 1);
        Ok(Self { field, kind: FilterKind::Range { start, end }, values })
    }

    pub fn step(field: CrontabField, start: i32, end: Option<i32>, step: i32) -> Result<Self> {
        check_bounds(field, start)?;
        if let Some(end) = end {
            check_bounds(field, end)?;
        }
        let last = end.unwrap_or_else(|| field.max());
        if step < 1 || step > field.max_accepted().max(1) {
            return Err(CrontabError::InvalidToken {
                field,
                token: format!("/{step}"),
                reason: format!("step must be between 1 and {}", field.max_accepted()),
            });
        }
        if start > last {
            return Err(CrontabError::InvalidToken {
                field,
                token: format!("{start}-{last}/{step}"),
                reason: "range start is greater than its end".to_string(),
            });
        }
        let values = expand(field, start, last, step);
        Ok(Self { field, kind: FilterKind::Step { start, end, step }, values })
    }

    pub fn last_day_of_month() -> Self {
        Self {
            field: CrontabField::Day,
            kind: FilterKind::LastDayOfMonth,
            values: Vec::new(),
        }
    }

    pub fn last_weekday_of_month() -> Self {
        Self {
            field: CrontabField::Day,
            kind: FilterKind::LastWeekdayOfMonth,
            values: Vec::new(),
        }
    }

    pub fn nearest_weekday(day: i32) -> Result<Self> {
        let day = check_bounds(CrontabField::Day, day)?;
        Ok(Self {
            field: CrontabField::Day,
            kind: FilterKind::NearestWeekday(day as u32),
            values: Vec::new(),
        })
    }

    pub fn nth_weekday_in_month(weekday: i32, nth: i32) -> Result<Self> {
        let weekday = normalize(
            CrontabField::DayOfWeek,
            check_bounds(CrontabField::DayOfWeek, weekday)?,
        );
        if !(1..=5).contains(&nth) {
            return Err(CrontabError::InvalidToken {
                field: CrontabField::DayOfWeek,
                token: format!("{weekday}#{nth}"),
                reason: "occurrence must be between 1 and 5".to_string(),
            });
        }
        Ok(Self {
            field: CrontabField::DayOfWeek,
            kind: FilterKind::NthWeekdayInMonth {
                weekday: weekday as u32,
                nth: nth as u32,
            },
            values: Vec::new(),
        })
    }

    pub fn last_weekday_in_month(weekday: i32) -> Result<Self> {
        let weekday = normalize(
            CrontabField::DayOfWeek,
            check_bounds(CrontabField::DayOfWeek, weekday)?,
        );
        Ok(Self {
            field: CrontabField::DayOfWeek,
            kind: FilterKind::LastWeekdayInMonth(weekday as u32),
            values: Vec::new(),
        })
    }

    pub fn no_constraint(field: CrontabField) -> Result<Self> {
        if !matches!(field, CrontabField::Day | CrontabField::DayOfWeek) {
            return Err(CrontabError::UnsupportedToken { field, token: "?".to_string() });
        }
        Ok(Self { field, kind: FilterKind::NoConstraint, values: Vec::new() })
    }

    pub fn field(&self) -> CrontabField {
        self.field
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// True when this filter accepts the calendar instant.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        let value = self.field.value_of(dt);
        match self.kind {
            FilterKind::LastDayOfMonth => {
                dt.day() == field::days_in_month(dt.year(), dt.month())
            }
            FilterKind::LastWeekdayOfMonth => {
                field::last_weekday_of_month(dt.year(), dt.month()) == Some(dt.day())
            }
            FilterKind::NearestWeekday(day) => {
                field::nearest_weekday(dt.year(), dt.month(), day) == Some(dt.day())
            }
            FilterKind::NthWeekdayInMonth { weekday, nth } => {
                value == weekday as i32 && (dt.day() - 1) / 7 + 1 == nth
            }
            FilterKind::LastWeekdayInMonth(weekday) => {
                value == weekday as i32
                    && dt.day() + 7 > field::days_in_month(dt.year(), dt.month())
            }
            _ => self.accepts(value),
        }
    }

    /// Value-only check for the kinds that do not need calendar context.
    pub(crate) fn accepts(&self, value: i32) -> bool {
        match self.kind {
            FilterKind::Any | FilterKind::NoConstraint => true,
            FilterKind::Specific(v) | FilterKind::SpecificYear(v) => v == value,
            FilterKind::Range { .. } | FilterKind::Step { .. } => {
                self.values.binary_search(&value).is_ok()
            }
            _ => false,
        }
    }

    /// Smallest satisfying value strictly greater than `current`.
    ///
    /// Only second, minute, hour and year filters support this; the date
    /// fields are resolved by scanning the calendar.
    pub fn next_value(&self, current: i32) -> Result<Option<i32>> {
        self.ensure_incrementable("next_value")?;
        let next = match self.kind {
            FilterKind::Any => {
                let candidate = (current + 1).max(self.field.min());
                (candidate <= self.field.max()).then_some(candidate)
            }
            FilterKind::Specific(v) | FilterKind::SpecificYear(v) => (v > current).then_some(v),
            FilterKind::Range { .. } | FilterKind::Step { .. } => {
                let at = self.values.partition_point(|v| *v <= current);
                self.values.get(at).copied()
            }
            _ => return Err(self.unsupported("next_value")),
        };
        Ok(next)
    }

    /// Smallest satisfying value. Same field restriction as [`next_value`](Self::next_value).
    pub fn first_value(&self) -> Result<i32> {
        self.ensure_incrementable("first_value")?;
        match self.kind {
            FilterKind::Any => Ok(self.field.min()),
            FilterKind::Specific(v) | FilterKind::SpecificYear(v) => Ok(v),
            FilterKind::Range { .. } | FilterKind::Step { .. } => self
                .values
                .first()
                .copied()
                .ok_or_else(|| self.unsupported("first_value")),
            _ => Err(self.unsupported("first_value")),
        }
    }

    /// Explicit value set for the kinds that have one; used by parse-time checks.
    pub(crate) fn explicit_values(&self) -> Option<Vec<i32>> {
        match self.kind {
            FilterKind::Specific(v) | FilterKind::SpecificYear(v) => Some(vec![v]),
            FilterKind::NearestWeekday(day) => Some(vec![day as i32]),
            FilterKind::Range { .. } | FilterKind::Step { .. } => Some(self.values.clone()),
            _ => None,
        }
    }

    fn ensure_incrementable(&self, operation: &'static str) -> Result<()> {
        if self.field.is_incrementable() {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    fn unsupported(&self, operation: &'static str) -> CrontabError {
        CrontabError::UnsupportedOperation { field: self.field, operation }
    }
}

impl fmt::Display for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FilterKind::Any => f.write_str("*"),
            FilterKind::Specific(v) | FilterKind::SpecificYear(v) => write!(f, "{v}"),
            FilterKind::Range { start, end } => write!(f, "{start}-{end}"),
            FilterKind::Step { start, end: None, step } if start == self.field.min() => {
                write!(f, "*/{step}")
            }
            FilterKind::Step { start, end: None, step } => write!(f, "{start}/{step}"),
            FilterKind::Step { start, end: Some(end), step } => write!(f, "{start}-{end}/{step}"),
            FilterKind::LastDayOfMonth => f.write_str("L"),
            FilterKind::LastWeekdayOfMonth => f.write_str("LW"),
            FilterKind::NearestWeekday(day) => write!(f, "{day}W"),
            FilterKind::NthWeekdayInMonth { weekday, nth } => write!(f, "{weekday}#{nth}"),
            FilterKind::LastWeekdayInMonth(weekday) => write!(f, "{weekday}L"),
            FilterKind::NoConstraint => f.write_str("?"),
        }
    }
}

fn check_bounds(field: CrontabField, value: i32) -> Result<i32> {
    if value < field.min() || value > field.max_accepted() {
        return Err(CrontabError::OutOfRange {
            field,
            value: i64::from(value),
            min: field.min(),
            max: field.max_accepted(),
        });
    }
    Ok(value)
}

/// Sunday is both 0 and 7 in expression text; only 0 is stored.
fn normalize(field: CrontabField, value: i32) -> i32 {
    if field == CrontabField::DayOfWeek && value == 7 {
        0
    } else {
        value
    }
}

fn expand(field: CrontabField, start: i32, end: i32, step: i32) -> Vec<i32> {
    let mut values: Vec<i32> = (start..=end)
        .step_by(step as usize)
        .map(|v| normalize(field, v))
        .collect();
    values.sort_unstable();
    values.dedup();
    values
}
