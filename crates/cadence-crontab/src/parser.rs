//! Text → filter set. Purely syntactic: no clock is consulted and the only
//! cross-field check (impossible dates) is done once here.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CrontabError, Result};
use crate::field::{self, CrontabField, NameLookup};
use crate::filter::{FieldFilter, FilterKind};
use crate::format::CronFormat;

/// Upper bound on comma-separated alternatives in a single field.
pub const MAX_ALTERNATIVES: usize = 64;

pub(crate) type FilterSet = BTreeMap<CrontabField, Vec<FieldFilter>>;

/// Expansion of the `@name` shorthands.
pub(crate) fn expand_macro(name: &str) -> Result<(&'static str, CronFormat)> {
    let expansion = match name.to_ascii_lowercase().as_str() {
        "@secondly" => ("* * * * * *", CronFormat::WithSeconds),
        "@minutely" => ("* * * * *", CronFormat::Standard),
        "@hourly" => ("0 * * * *", CronFormat::Standard),
        "@daily" | "@midnight" => ("0 0 * * *", CronFormat::Standard),
        "@weekly" => ("0 0 * * 0", CronFormat::Standard),
        "@monthly" => ("0 0 1 * *", CronFormat::Standard),
        "@yearly" | "@annually" => ("0 0 1 1 *", CronFormat::Standard),
        "@workday" => ("0 0 * * 1-5", CronFormat::Standard),
        _ => return Err(CrontabError::UnknownMacro(name.to_string())),
    };
    Ok(expansion)
}

pub(crate) fn parse_fields(expression: &str, format: CronFormat) -> Result<FilterSet> {
    let tokens: Vec<&str> = expression.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(CrontabError::Empty);
    }
    if tokens.len() != format.field_count() {
        return Err(CrontabError::FieldCount {
            format,
            expected: format.field_count(),
            found: tokens.len(),
        });
    }

    let mut filters = FilterSet::new();
    for (field, token) in format.fields().iter().zip(tokens) {
        filters.insert(*field, parse_field(*field, token)?);
    }

    check_calendar(&filters)?;
    Ok(filters)
}

fn parse_field(field: CrontabField, token: &str) -> Result<Vec<FieldFilter>> {
    let parts: Vec<&str> = token.split(',').collect();
    if parts.len() > MAX_ALTERNATIVES {
        return Err(CrontabError::TooManyAlternatives { field, max: MAX_ALTERNATIVES });
    }
    if parts.len() > 1 && parts.iter().any(|p| *p == "?") {
        return Err(CrontabError::InvalidToken {
            field,
            token: token.to_string(),
            reason: "'?' cannot be combined with other values".to_string(),
        });
    }

    parts
        .into_iter()
        .map(|part| {
            if part.is_empty() {
                return Err(CrontabError::InvalidToken {
                    field,
                    token: token.to_string(),
                    reason: "empty alternative".to_string(),
                });
            }
            parse_alternative(field, part)
        })
        .collect()
}

fn parse_alternative(field: CrontabField, part: &str) -> Result<FieldFilter> {
    let upper = part.to_ascii_uppercase();

    match upper.as_str() {
        "?" => return FieldFilter::no_constraint(field),
        "*" => return Ok(FieldFilter::any(field)),
        _ => {}
    }

    if let Some(filter) = parse_special(field, &upper)? {
        return Ok(filter);
    }

    if let Some((base, step)) = upper.split_once('/') {
        let step = parse_number(field, step)?;
        let (start, end) = if base == "*" {
            (field.min(), None)
        } else if let Some((a, b)) = base.split_once('-') {
            (parse_value(field, a)?, Some(parse_value(field, b)?))
        } else {
            (parse_value(field, base)?, None)
        };
        return FieldFilter::step(field, start, end, step);
    }

    if let Some((a, b)) = upper.split_once('-') {
        return FieldFilter::range(field, parse_value(field, a)?, parse_value(field, b)?);
    }

    FieldFilter::specific(field, parse_value(field, &upper)?)
}

/// `L`, `LW`, `nW`, `d#n`, `dL`. Returns `Ok(None)` when `token` is not a special form.
fn parse_special(field: CrontabField, token: &str) -> Result<Option<FieldFilter>> {
    let unsupported = || CrontabError::UnsupportedToken { field, token: token.to_string() };
    let digits_then = |suffix: char| {
        token
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
    };

    match field {
        CrontabField::Day => {
            if token == "L" {
                return Ok(Some(FieldFilter::last_day_of_month()));
            }
            if token == "LW" {
                return Ok(Some(FieldFilter::last_weekday_of_month()));
            }
            if let Some(day) = token.strip_suffix('W') {
                return FieldFilter::nearest_weekday(parse_number(field, day)?).map(Some);
            }
            if token.contains('#') {
                return Err(unsupported());
            }
        }
        CrontabField::DayOfWeek => {
            if token == "LW" || digits_then('W') {
                return Err(unsupported());
            }
            if let Some((weekday, nth)) = token.split_once('#') {
                return FieldFilter::nth_weekday_in_month(
                    parse_value(field, weekday)?,
                    parse_number(field, nth)?,
                )
                .map(Some);
            }
            if let Some(weekday) = token.strip_suffix('L') {
                if weekday.is_empty() {
                    return Err(unsupported());
                }
                return FieldFilter::last_weekday_in_month(parse_value(field, weekday)?).map(Some);
            }
        }
        _ => {
            if token.contains('#') || token == "LW" || digits_then('W') || digits_then('L') {
                return Err(unsupported());
            }
        }
    }
    Ok(None)
}

fn parse_number(field: CrontabField, token: &str) -> Result<i32> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(CrontabError::InvalidToken {
            field,
            token: token.to_string(),
            reason: "expected a number".to_string(),
        });
    }
    token.parse::<i32>().map_err(|_| CrontabError::OutOfRange {
        field,
        value: i64::MAX,
        min: field.min(),
        max: field.max_accepted(),
    })
}

/// A number, or a month/weekday name for the fields that have names.
fn parse_value(field: CrontabField, token: &str) -> Result<i32> {
    if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
        return parse_number(field, token);
    }
    match field.resolve_name(token) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(CrontabError::InvalidToken {
            field,
            token: token.to_string(),
            reason: "expected a number".to_string(),
        }),
        Err(NameLookup::Unknown) => Err(CrontabError::UnknownName {
            field,
            name: token.to_string(),
        }),
        Err(NameLookup::Ambiguous(candidates)) => Err(CrontabError::AmbiguousName {
            field,
            name: token.to_string(),
            candidates,
        }),
    }
}

/// Reject day/month combinations that can never occur, e.g. `30 2` or `31 4,6`.
///
/// Only applies when both fields are pinned to explicit values; wildcards
/// and the calendar-relative forms always have some valid month.
fn check_calendar(filters: &FilterSet) -> Result<()> {
    let explicit = |field: CrontabField| -> Option<BTreeSet<i32>> {
        let list = filters.get(&field)?;
        let mut values = BTreeSet::new();
        for filter in list {
            if matches!(filter.kind(), FilterKind::NoConstraint) {
                return None;
            }
            values.extend(filter.explicit_values()?);
        }
        Some(values)
    };

    let (Some(days), Some(months)) = (explicit(CrontabField::Day), explicit(CrontabField::Month))
    else {
        return Ok(());
    };

    let possible = days.iter().any(|day| {
        months
            .iter()
            .any(|month| *day as u32 <= field::max_days_in_month(*month as u32))
    });
    if possible {
        return Ok(());
    }

    Err(CrontabError::ImpossibleDate {
        day: days.first().copied().unwrap_or_default() as u32,
        months: months
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(","),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(filters: &FilterSet, field: CrontabField) -> Vec<FilterKind> {
        filters[&field].iter().map(|f| f.kind().clone()).collect()
    }

    #[test]
    fn standard_expression() {
        let filters = parse_fields("*/15 9-17 * JAN,jul MON-FRI", CronFormat::Standard).unwrap();
        assert_eq!(filters.len(), 5);
        assert!(!filters.contains_key(&CrontabField::Second));
        assert_eq!(
            kinds(&filters, CrontabField::Month),
            vec![FilterKind::Specific(1), FilterKind::Specific(7)]
        );
        assert_eq!(
            kinds(&filters, CrontabField::DayOfWeek),
            vec![FilterKind::Range { start: 1, end: 5 }]
        );
    }

    #[test]
    fn special_forms() {
        let filters = parse_fields("0 0 0 LW * 5L", CronFormat::WithSeconds).unwrap();
        assert_eq!(kinds(&filters, CrontabField::Day), vec![FilterKind::LastWeekdayOfMonth]);
        assert_eq!(
            kinds(&filters, CrontabField::DayOfWeek),
            vec![FilterKind::LastWeekdayInMonth(5)]
        );

        let filters = parse_fields("0 0 15W * fri#2", CronFormat::Standard).unwrap();
        assert_eq!(kinds(&filters, CrontabField::Day), vec![FilterKind::NearestWeekday(15)]);
        assert_eq!(
            kinds(&filters, CrontabField::DayOfWeek),
            vec![FilterKind::NthWeekdayInMonth { weekday: 5, nth: 2 }]
        );
    }

    #[test]
    fn field_count_must_match_format() {
        assert!(matches!(
            parse_fields("* * * * *", CronFormat::WithSeconds),
            Err(CrontabError::FieldCount { expected: 6, found: 5, .. })
        ));
        assert!(matches!(parse_fields("   ", CronFormat::Standard), Err(CrontabError::Empty)));
    }

    #[test]
    fn out_of_range_values() {
        assert!(matches!(
            parse_fields("60 * * * *", CronFormat::Standard),
            Err(CrontabError::OutOfRange { field: CrontabField::Minute, .. })
        ));
        assert!(matches!(
            parse_fields("* 24 * * *", CronFormat::Standard),
            Err(CrontabError::OutOfRange { field: CrontabField::Hour, .. })
        ));
        assert!(matches!(
            parse_fields("* * * 13 *", CronFormat::Standard),
            Err(CrontabError::OutOfRange { .. })
        ));
    }

    #[test]
    fn names_must_be_unambiguous() {
        assert!(matches!(
            parse_fields("* * * ju *", CronFormat::Standard),
            Err(CrontabError::AmbiguousName { field: CrontabField::Month, .. })
        ));
        assert!(matches!(
            parse_fields("* * * * funday", CronFormat::Standard),
            Err(CrontabError::UnknownName { .. })
        ));
        assert!(matches!(
            parse_fields("* jan * * *", CronFormat::Standard),
            Err(CrontabError::InvalidToken { field: CrontabField::Hour, .. })
        ));
    }

    #[test]
    fn special_forms_on_wrong_fields() {
        assert!(matches!(
            parse_fields("L * * * *", CronFormat::Standard),
            Err(CrontabError::UnsupportedToken { field: CrontabField::Minute, .. })
        ));
        assert!(matches!(
            parse_fields("* * 1#2 * *", CronFormat::Standard),
            Err(CrontabError::UnsupportedToken { field: CrontabField::Day, .. })
        ));
        assert!(matches!(
            parse_fields("* * * 5W *", CronFormat::Standard),
            Err(CrontabError::UnsupportedToken { field: CrontabField::Month, .. })
        ));
        assert!(matches!(
            parse_fields("? * * * *", CronFormat::Standard),
            Err(CrontabError::UnsupportedToken { .. })
        ));
        assert!(matches!(
            parse_fields("* * * * L", CronFormat::Standard),
            Err(CrontabError::UnsupportedToken { field: CrontabField::DayOfWeek, .. })
        ));
        for token in ["LW", "15W"] {
            assert!(matches!(
                parse_fields(&format!("0 0 * * {token}"), CronFormat::Standard),
                Err(CrontabError::UnsupportedToken { field: CrontabField::DayOfWeek, .. })
            ));
        }
    }

    #[test]
    fn malformed_alternatives() {
        assert!(matches!(
            parse_fields("1,,2 * * * *", CronFormat::Standard),
            Err(CrontabError::InvalidToken { .. })
        ));
        assert!(matches!(
            parse_fields("* * ?,1 * *", CronFormat::Standard),
            Err(CrontabError::InvalidToken { .. })
        ));
        let too_many = (0..=MAX_ALTERNATIVES).map(|_| "1").collect::<Vec<_>>().join(",");
        assert!(matches!(
            parse_fields(&format!("* * * * * {too_many}"), CronFormat::WithYears),
            Err(CrontabError::TooManyAlternatives { field: CrontabField::Year, .. })
        ));
    }

    #[test]
    fn february_thirtieth_is_rejected() {
        let err = parse_fields("0 0 30 2 *", CronFormat::Standard).unwrap_err();
        assert!(err.is_calendar_impossibility());
        assert!(err.is_syntax_error());
        assert!(parse_fields("0 0 30,31 feb ?", CronFormat::Standard).is_err());
        assert!(parse_fields("0 0 31 4,6,9,11 *", CronFormat::Standard).is_err());
        // One possible pair is enough.
        assert!(parse_fields("0 0 29,30 2 *", CronFormat::Standard).is_ok());
        assert!(parse_fields("0 0 31 2,3 *", CronFormat::Standard).is_ok());
        assert!(parse_fields("0 0 L 2 *", CronFormat::Standard).is_ok());
    }

    #[test]
    fn macros() {
        assert_eq!(expand_macro("@DAILY").unwrap(), ("0 0 * * *", CronFormat::Standard));
        assert_eq!(expand_macro("@secondly").unwrap().1, CronFormat::WithSeconds);
        assert!(matches!(expand_macro("@fortnightly"), Err(CrontabError::UnknownMacro(_))));
    }
}
