//! Job trigger types and fire-time arithmetic.
//!
//! A trigger decides when a job fires next. Three kinds exist:
//!
//! - `cron`: a five-field cron expression (minute, hour, day-of-month,
//!   month, day-of-week) evaluated in UTC
//! - `interval`: a fixed period with optional start/end bounds
//! - `once`: a single run date
//!
//! Triggers are serialized into the job store as part of the job payload, so
//! the representation is plain data; evaluation happens through
//! [`Trigger::next_fire_after`] and [`Trigger::initial_fire`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The kind of a trigger, as recorded in job history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Cron expression trigger.
    Cron,
    /// Fixed-interval trigger.
    Interval,
    /// One-time trigger.
    Once,
}

impl TriggerKind {
    /// Stable string form used in history rows and API responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Once => "once",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period and bounds of an interval trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    /// Weeks between runs.
    #[serde(default)]
    pub weeks: u32,
    /// Days between runs.
    #[serde(default)]
    pub days: u32,
    /// Hours between runs.
    #[serde(default)]
    pub hours: u32,
    /// Minutes between runs.
    #[serde(default)]
    pub minutes: u32,
    /// Seconds between runs.
    #[serde(default)]
    pub seconds: u32,
    /// Do not fire before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Do not fire after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl IntervalSpec {
    /// Total period of the interval.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::weeks(i64::from(self.weeks))
            + Duration::days(i64::from(self.days))
            + Duration::hours(i64::from(self.hours))
            + Duration::minutes(i64::from(self.minutes))
            + Duration::seconds(i64::from(self.seconds))
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire on a cron schedule.
    Cron {
        /// Five-field cron expression, evaluated in UTC.
        expr: String,
    },
    /// Fire every fixed period.
    Interval {
        /// Period and optional bounds.
        #[serde(flatten)]
        spec: IntervalSpec,
    },
    /// Fire exactly once.
    Once {
        /// The run date.
        run_at: DateTime<Utc>,
    },
}

impl Trigger {
    /// Build a cron trigger, validating the expression eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCronExpression`] if the expression does
    /// not parse as five-field cron.
    pub fn cron(expr: impl Into<String>) -> Result<Self> {
        let expr = expr.into();
        parse_cron(&expr)?;
        Ok(Self::Cron { expr })
    }

    /// Build an interval trigger, validating the period and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ZeroInterval`] for an empty period and
    /// [`CoreError::IntervalEndBeforeStart`] for inverted bounds.
    pub fn interval(spec: IntervalSpec) -> Result<Self> {
        if spec.period() <= Duration::zero() {
            return Err(CoreError::ZeroInterval);
        }
        if let (Some(start), Some(end)) = (spec.start, spec.end) {
            if end < start {
                return Err(CoreError::IntervalEndBeforeStart);
            }
        }
        Ok(Self::Interval { spec })
    }

    /// Build a one-time trigger.
    #[must_use]
    pub const fn once(run_at: DateTime<Utc>) -> Self {
        Self::Once { run_at }
    }

    /// The trigger kind.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Interval { .. } => TriggerKind::Interval,
            Self::Once { .. } => TriggerKind::Once,
        }
    }

    /// Human-readable representation stored in history rows.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Cron { expr } => format!("cron[{expr}]"),
            Self::Interval { spec } => {
                let period = spec.period();
                format!("interval[{}s]", period.num_seconds())
            }
            Self::Once { run_at } => format!("once[{}]", run_at.to_rfc3339()),
        }
    }

    /// The first fire time for a freshly-created job.
    ///
    /// A `once` trigger always reports its run date, even when it lies in
    /// the past; the scheduler's misfire policy decides what to do with it.
    #[must_use]
    pub fn initial_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { expr } => cron_next(expr, now),
            Self::Interval { spec } => {
                let candidate = match spec.start {
                    Some(start) if start > now => start,
                    _ => now + spec.period(),
                };
                bounded(candidate, spec.end)
            }
            Self::Once { run_at } => Some(*run_at),
        }
    }

    /// The next fire time strictly after `after` (normally the last fire).
    ///
    /// Returns `None` when the trigger is exhausted: always for `once`, and
    /// for `interval` once the end bound has passed.
    #[must_use]
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { expr } => cron_next(expr, after),
            Self::Interval { spec } => bounded(after + spec.period(), spec.end),
            Self::Once { .. } => None,
        }
    }
}

fn bounded(candidate: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match end {
        Some(end) if candidate > end => None,
        _ => Some(candidate),
    }
}

/// Parse a five-field cron expression.
///
/// The `cron` crate wants a seconds field, so a conventional five-field
/// expression is normalized by prepending `0`. Six- and seven-field
/// expressions are passed through untouched.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {expr}"),
        6 | 7 => expr.to_string(),
        n => {
            return Err(CoreError::InvalidCronExpression {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, got {n}"),
            })
        }
    };
    cron::Schedule::from_str(&normalized).map_err(|e| CoreError::InvalidCronExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn cron_next(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // The expression was validated at construction; a parse failure here
    // means the payload was tampered with, and the job simply stops firing.
    let schedule = parse_cron(expr).ok()?;
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn cron_trigger_fires_on_matching_minute() {
        let trigger = Trigger::cron("*/15 * * * *").unwrap();
        let now = at("2025-03-01T10:07:00Z");
        let next = trigger.initial_fire(now).unwrap();
        assert_eq!(next, at("2025-03-01T10:15:00Z"));
    }

    #[test]
    fn cron_trigger_rejects_bad_field_count() {
        assert!(matches!(
            Trigger::cron("* * *").unwrap_err(),
            CoreError::InvalidCronExpression { .. }
        ));
    }

    #[test]
    fn interval_advances_by_period() {
        let trigger = Trigger::interval(IntervalSpec {
            minutes: 30,
            ..IntervalSpec::default()
        })
        .unwrap();
        let last = at("2025-03-01T10:00:00Z");
        assert_eq!(
            trigger.next_fire_after(last).unwrap(),
            at("2025-03-01T10:30:00Z")
        );
    }

    #[test]
    fn interval_respects_start_and_end() {
        let trigger = Trigger::interval(IntervalSpec {
            hours: 1,
            start: Some(at("2025-03-02T00:00:00Z")),
            end: Some(at("2025-03-02T01:30:00Z")),
            ..IntervalSpec::default()
        })
        .unwrap();

        let now = at("2025-03-01T10:00:00Z");
        assert_eq!(trigger.initial_fire(now).unwrap(), at("2025-03-02T00:00:00Z"));

        // One period past the end bound exhausts the trigger.
        assert_eq!(trigger.next_fire_after(at("2025-03-02T01:00:00Z")), None);
    }

    #[test]
    fn interval_requires_positive_period() {
        assert!(matches!(
            Trigger::interval(IntervalSpec::default()).unwrap_err(),
            CoreError::ZeroInterval
        ));
    }

    #[test]
    fn once_reports_run_date_then_exhausts() {
        let run_at = at("2025-03-01T12:00:00Z");
        let trigger = Trigger::once(run_at);
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(trigger.initial_fire(now), Some(run_at));
        assert_eq!(trigger.next_fire_after(run_at), None);
    }

    #[test]
    fn once_in_the_past_still_reports_run_date() {
        // Misfire handling belongs to the scheduler, not the trigger.
        let run_at = at("2020-01-01T00:00:00Z");
        let now = at("2025-03-01T00:00:00Z");
        assert_eq!(Trigger::once(run_at).initial_fire(now), Some(run_at));
    }

    #[test]
    fn trigger_serde_round_trip() {
        let triggers = vec![
            Trigger::cron("0 3 * * *").unwrap(),
            Trigger::interval(IntervalSpec {
                days: 1,
                ..IntervalSpec::default()
            })
            .unwrap(),
            Trigger::once(at("2025-06-01T00:00:00Z")),
        ];
        for trigger in triggers {
            let json = serde_json::to_string(&trigger).unwrap();
            let back: Trigger = serde_json::from_str(&json).unwrap();
            assert_eq!(back, trigger);
        }
    }

    #[test]
    fn repr_is_stable() {
        assert_eq!(
            Trigger::cron("0 3 * * *").unwrap().repr(),
            "cron[0 3 * * *]"
        );
        let interval = Trigger::interval(IntervalSpec {
            minutes: 5,
            ..IntervalSpec::default()
        })
        .unwrap();
        assert_eq!(interval.repr(), "interval[300s]");
    }
}
