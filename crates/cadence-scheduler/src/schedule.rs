use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cadence_crontab::{CronFormat, Crontab};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::{Result, SchedulerError};

/// Shortest interval a `period` schedule accepts.
pub const MIN_PERIOD_MS: u64 = 100;

/// Produces the instants at which a trigger fires.
pub trait TriggerSchedule: fmt::Debug + Send + Sync {
    /// First firing instant strictly after `instant`, or `None` when the
    /// schedule has no more occurrences.
    fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// First occurrence following `previous` that lies strictly after
    /// `reference`. Occurrences in between are skipped; the series keeps
    /// its phase relative to `previous`.
    fn next_skipping(
        &self,
        previous: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut next = self.next_after(previous)?;
        while next <= reference {
            next = self.next_after(next)?;
        }
        Some(next)
    }

    /// Human-readable form, e.g. the expression text.
    fn describe(&self) -> String;
}

/// Calendar expression schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    crontab: Crontab,
}

impl CronSchedule {
    pub fn new(crontab: Crontab) -> Self {
        Self { crontab }
    }

    /// Parse with the format inferred from the field count.
    pub fn parse(expression: &str) -> Result<Self> {
        Ok(Self::new(expression.parse()?))
    }

    pub fn crontab(&self) -> &Crontab {
        &self.crontab
    }
}

impl TriggerSchedule for CronSchedule {
    fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.crontab.next_occurrence(instant)
    }

    // Calendar occurrences are absolute, so searching from the later of the
    // two instants lands on the same series.
    fn next_skipping(
        &self,
        previous: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.crontab.next_occurrence(previous.max(reference))
    }

    fn describe(&self) -> String {
        self.crontab.to_string()
    }
}

/// Fixed-interval schedule.
#[derive(Debug, Clone, Copy)]
pub struct PeriodSchedule {
    every: Duration,
}

impl PeriodSchedule {
    pub fn new(every: std::time::Duration) -> Result<Self> {
        if every.as_millis() < u128::from(MIN_PERIOD_MS) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "period must be at least {MIN_PERIOD_MS} ms"
            )));
        }
        let every = Duration::from_std(every)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
        Ok(Self { every })
    }

    pub fn every(&self) -> Duration {
        self.every
    }
}

impl TriggerSchedule for PeriodSchedule {
    fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        instant.checked_add_signed(self.every)
    }

    fn next_skipping(
        &self,
        previous: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if reference < previous {
            return self.next_after(previous);
        }
        let (Some(gap), Some(step)) = ((reference - previous).num_nanoseconds(), self.every.num_nanoseconds())
        else {
            return self.next_after(reference);
        };
        match step.checked_mul(gap / step + 1) {
            Some(offset) => previous.checked_add_signed(Duration::nanoseconds(offset)),
            None => self.next_after(reference),
        }
    }

    fn describe(&self) -> String {
        format!("every {} ms", self.every.num_milliseconds())
    }
}

/// Builds a schedule from the `args` list of a trigger definition.
pub type ScheduleFactory = Arc<dyn Fn(&[Value]) -> Result<Arc<dyn TriggerSchedule>> + Send + Sync>;

/// Schedule factories keyed by kind tag.
///
/// [`ScheduleFactories::default`] knows `cron` and `period`; hosts register
/// their own kinds before handing the set to the registry.
#[derive(Clone)]
pub struct ScheduleFactories {
    factories: HashMap<String, ScheduleFactory>,
}

impl ScheduleFactories {
    /// A set with no kinds at all.
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Arc<dyn TriggerSchedule>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(&self, kind: &str, args: &[Value]) -> Result<Arc<dyn TriggerSchedule>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| SchedulerError::UnknownScheduleKind(kind.to_string()))?;
        factory(args)
    }
}

impl Default for ScheduleFactories {
    fn default() -> Self {
        let mut factories = Self::empty();
        factories.register("cron", cron_from_args);
        factories.register("period", period_from_args);
        factories
    }
}

impl fmt::Debug for ScheduleFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleFactories")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// `["<expression>"]` or `["<expression>", "<format>"]`.
fn cron_from_args(args: &[Value]) -> Result<Arc<dyn TriggerSchedule>> {
    let expression = args.first().and_then(Value::as_str).ok_or_else(|| {
        SchedulerError::InvalidSchedule("cron expects an expression string".to_string())
    })?;

    let crontab = match args.get(1) {
        None => expression.parse::<Crontab>()?,
        Some(format) => {
            let format: CronFormat = format
                .as_str()
                .ok_or_else(|| SchedulerError::InvalidSchedule("cron format must be a string".to_string()))?
                .parse()
                .map_err(SchedulerError::InvalidSchedule)?;
            Crontab::parse(expression, format)?
        }
    };
    Ok(Arc::new(CronSchedule::new(crontab)))
}

/// `[<milliseconds>]`.
fn period_from_args(args: &[Value]) -> Result<Arc<dyn TriggerSchedule>> {
    let ms = args.first().and_then(Value::as_u64).ok_or_else(|| {
        SchedulerError::InvalidSchedule("period expects an interval in milliseconds".to_string())
    })?;
    Ok(Arc::new(PeriodSchedule::new(std::time::Duration::from_millis(ms))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn cron_factory_detects_format() {
        let factories = ScheduleFactories::default();
        let schedule = factories.build("cron", &[json!("*/5 * * * * *")]).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(from),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 5).unwrap())
        );
    }

    #[test]
    fn cron_factory_honours_explicit_format() {
        let factories = ScheduleFactories::default();
        let schedule = factories
            .build("cron", &[json!("0 12 * * * 2030"), json!("with_years")])
            .unwrap();
        assert_eq!(schedule.describe(), "0 12 * * * 2030");
        assert!(factories
            .build("cron", &[json!("0 12 * * *"), json!("hourly")])
            .is_err());
    }

    #[test]
    fn cron_syntax_errors_surface() {
        let factories = ScheduleFactories::default();
        let err = factories.build("cron", &[json!("0 0 30 2 *")]).unwrap_err();
        assert_eq!(err.code(), "IMPOSSIBLE_DATE");
        let err = factories.build("cron", &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn period_factory() {
        let factories = ScheduleFactories::default();
        let schedule = factories.build("period", &[json!(1500)]).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(schedule.next_after(from), Some(from + Duration::milliseconds(1500)));
        assert!(factories.build("period", &[json!(10)]).is_err());
        assert!(factories.build("period", &[json!("fast")]).is_err());
    }

    #[test]
    fn period_skips_whole_periods_after_late_wake() {
        let schedule = PeriodSchedule::new(std::time::Duration::from_secs(1)).unwrap();
        let previous = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        let late = previous + Duration::milliseconds(5);
        assert_eq!(schedule.next_skipping(previous, late), Some(previous + Duration::seconds(1)));

        let very_late = previous + Duration::milliseconds(3_200);
        assert_eq!(schedule.next_skipping(previous, very_late), Some(previous + Duration::seconds(4)));

        let on_boundary = previous + Duration::seconds(2);
        assert_eq!(schedule.next_skipping(previous, on_boundary), Some(previous + Duration::seconds(3)));
    }

    #[test]
    fn cron_skipping_stays_on_the_calendar() {
        let schedule = CronSchedule::parse("*/10 * * * * *").unwrap();
        let previous = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_skipping(previous, previous + Duration::seconds(25)),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap())
        );
    }

    #[test]
    fn default_skipping_walks_the_series() {
        #[derive(Debug)]
        struct EveryThree;
        impl TriggerSchedule for EveryThree {
            fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
                Some(instant + Duration::seconds(3))
            }
            fn describe(&self) -> String {
                "every 3 s".to_string()
            }
        }

        let previous = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            EveryThree.next_skipping(previous, previous + Duration::seconds(7)),
            Some(previous + Duration::seconds(9))
        );
    }

    #[test]
    fn custom_kinds_and_unknown_kinds() {
        #[derive(Debug)]
        struct Never;
        impl TriggerSchedule for Never {
            fn next_after(&self, _: DateTime<Utc>) -> Option<DateTime<Utc>> {
                None
            }
            fn describe(&self) -> String {
                "never".to_string()
            }
        }

        let mut factories = ScheduleFactories::default();
        factories.register("never", |_| Ok(Arc::new(Never) as Arc<dyn TriggerSchedule>));
        assert_eq!(factories.kinds(), vec!["cron", "never", "period"]);
        assert_eq!(factories.build("never", &[]).unwrap().describe(), "never");
        assert!(matches!(
            factories.build("lunar", &[]),
            Err(SchedulerError::UnknownScheduleKind(_))
        ));
    }
}
