//! `cadence-crontab`: calendar expressions and next-occurrence arithmetic.
//!
//! # Grammar
//!
//! Fields, left to right: `[second] minute hour day month weekday [year]`.
//!
//! | Token        | Meaning                                   | Fields          |
//! |--------------|-------------------------------------------|-----------------|
//! | `*`          | any value                                 | all             |
//! | `a`          | exactly `a`                               | all             |
//! | `a-b`        | inclusive range                           | all             |
//! | `*/n`, `a/n`, `a-b/n` | every `n`th value                | all             |
//! | `a,b,c`      | union of the above                        | all             |
//! | `L`, `LW`    | last day / last business day of the month | day             |
//! | `nW`         | business day nearest to day `n`           | day             |
//! | `d#n`, `dL`  | `n`th / last weekday `d` of the month     | weekday         |
//! | `?`          | no constraint                             | day, weekday    |
//!
//! Month and weekday names match by case-insensitive prefix. Weekday 7 is
//! Sunday, same as 0. When both day and weekday are constrained, a date
//! must satisfy both.
//!
//! ```
//! use cadence_crontab::Crontab;
//! use chrono::{TimeZone, Utc};
//!
//! let every_quarter: Crontab = "*/15 * * * *".parse().unwrap();
//! let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 7, 0).unwrap();
//! assert_eq!(
//!     every_quarter.next_occurrence(from),
//!     Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap())
//! );
//! ```

pub mod crontab;
pub mod error;
pub mod field;
pub mod filter;
pub mod format;
mod parser;

pub use crontab::{Crontab, Occurrences};
pub use error::{CrontabError, Result};
pub use field::{CrontabField, MAX_YEAR, MIN_YEAR};
pub use filter::{FieldFilter, FilterKind};
pub use format::CronFormat;
pub use parser::MAX_ALTERNATIVES;
