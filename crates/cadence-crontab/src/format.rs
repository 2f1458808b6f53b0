use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field::CrontabField;

const STANDARD: &[CrontabField] = &[
    CrontabField::Minute,
    CrontabField::Hour,
    CrontabField::Day,
    CrontabField::Month,
    CrontabField::DayOfWeek,
];
const WITH_SECONDS: &[CrontabField] = &[
    CrontabField::Second,
    CrontabField::Minute,
    CrontabField::Hour,
    CrontabField::Day,
    CrontabField::Month,
    CrontabField::DayOfWeek,
];
const WITH_YEARS: &[CrontabField] = &[
    CrontabField::Minute,
    CrontabField::Hour,
    CrontabField::Day,
    CrontabField::Month,
    CrontabField::DayOfWeek,
    CrontabField::Year,
];
const WITH_SECONDS_AND_YEARS: &[CrontabField] = &[
    CrontabField::Second,
    CrontabField::Minute,
    CrontabField::Hour,
    CrontabField::Day,
    CrontabField::Month,
    CrontabField::DayOfWeek,
    CrontabField::Year,
];

/// Which optional columns an expression carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronFormat {
    /// `minute hour day month weekday`
    #[default]
    Standard,
    /// `second minute hour day month weekday`
    WithSeconds,
    /// `minute hour day month weekday year`
    WithYears,
    /// `second minute hour day month weekday year`
    WithSecondsAndYears,
}

impl CronFormat {
    /// Fields in expression order, left to right.
    pub fn fields(self) -> &'static [CrontabField] {
        match self {
            Self::Standard => STANDARD,
            Self::WithSeconds => WITH_SECONDS,
            Self::WithYears => WITH_YEARS,
            Self::WithSecondsAndYears => WITH_SECONDS_AND_YEARS,
        }
    }

    pub fn field_count(self) -> usize {
        self.fields().len()
    }

    pub fn has_seconds(self) -> bool {
        matches!(self, Self::WithSeconds | Self::WithSecondsAndYears)
    }

    pub fn has_years(self) -> bool {
        matches!(self, Self::WithYears | Self::WithSecondsAndYears)
    }

    /// Guess the format from a field count. Six fields are read as seconds-first.
    pub fn detect(field_count: usize) -> Option<Self> {
        match field_count {
            5 => Some(Self::Standard),
            6 => Some(Self::WithSeconds),
            7 => Some(Self::WithSecondsAndYears),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::WithSeconds => "with_seconds",
            Self::WithYears => "with_years",
            Self::WithSecondsAndYears => "with_seconds_and_years",
        }
    }
}

impl fmt::Display for CronFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CronFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "with_seconds" | "seconds" => Ok(Self::WithSeconds),
            "with_years" | "years" => Ok(Self::WithYears),
            "with_seconds_and_years" | "seconds_and_years" => Ok(Self::WithSecondsAndYears),
            other => Err(format!("unknown cron format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_counts() {
        assert_eq!(CronFormat::Standard.field_count(), 5);
        assert_eq!(CronFormat::WithSeconds.field_count(), 6);
        assert_eq!(CronFormat::WithYears.field_count(), 6);
        assert_eq!(CronFormat::WithSecondsAndYears.field_count(), 7);
    }

    #[test]
    fn year_is_always_last() {
        assert_eq!(CronFormat::WithYears.fields().last(), Some(&CrontabField::Year));
        assert_eq!(CronFormat::WithSeconds.fields()[0], CrontabField::Second);
    }

    #[test]
    fn names_round_trip() {
        for format in [
            CronFormat::Standard,
            CronFormat::WithSeconds,
            CronFormat::WithYears,
            CronFormat::WithSecondsAndYears,
        ] {
            assert_eq!(format.to_string().parse::<CronFormat>(), Ok(format));
        }
        assert!("hourly".parse::<CronFormat>().is_err());
    }
}
