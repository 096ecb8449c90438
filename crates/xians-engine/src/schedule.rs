//! Schedule types
//!
//! Schedules start workflows on a cadence described by a [`ScheduleSpec`].
//! Cron expressions are 5-field (minute hour day-of-month month day-of-week)
//! with an optional IANA timezone, defaulting to UTC.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::options::StartWorkflowOptions;
use crate::retry::duration_millis_opt;

/// When a schedule fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// 5-field cron expression with optional timezone (default UTC)
    Cron {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fixed interval with optional phase offset; no timezone applies
    Interval {
        #[serde(with = "crate::retry::duration_millis")]
        every: Duration,
        #[serde(default, with = "duration_millis_opt")]
        offset: Option<Duration>,
    },

    /// One-shot fire at a point in time
    Calendar {
        at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl ScheduleSpec {
    /// Validate the spec without creating a schedule
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::Cron { expression, timezone } => {
                parse_cron(expression)?;
                if let Some(tz) = timezone {
                    parse_timezone(tz)?;
                }
                Ok(())
            }
            Self::Interval { every, .. } => {
                if every.is_zero() {
                    return Err(EngineError::InvalidScheduleSpec(
                        "interval must be greater than zero".into(),
                    ));
                }
                Ok(())
            }
            Self::Calendar { timezone, .. } => {
                if let Some(tz) = timezone {
                    parse_timezone(tz)?;
                }
                Ok(())
            }
        }
    }

    /// Next fire time strictly after `after`, or `None` when the schedule is
    /// exhausted (one-shot calendar in the past).
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, EngineError> {
        match self {
            Self::Cron { expression, timezone } => {
                let schedule = parse_cron(expression)?;
                let tz = match timezone {
                    Some(tz) => parse_timezone(tz)?,
                    None => Tz::UTC,
                };
                let local = after.with_timezone(&tz);
                Ok(schedule.after(&local).next().map(|dt| dt.with_timezone(&Utc)))
            }
            Self::Interval { every, offset } => {
                let every_ms = every.as_millis() as i64;
                let offset_ms = offset.map(|o| o.as_millis() as i64).unwrap_or(0);
                let after_ms = after.timestamp_millis();
                // First interval boundary at or after `after`, phase-shifted.
                let periods = (after_ms - offset_ms).div_euclid(every_ms) + 1;
                let next_ms = periods * every_ms + offset_ms;
                Ok(Utc.timestamp_millis_opt(next_ms).single())
            }
            Self::Calendar { at, .. } => {
                if *at > after {
                    Ok(Some(*at))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// All fire times in the half-open range `(start, end]`, used by backfill
    pub fn fires_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        let mut fires = Vec::new();
        let mut cursor = start;
        while let Some(next) = self.next_fire_after(cursor)? {
            if next > end {
                break;
            }
            fires.push(next);
            cursor = next;
        }
        Ok(fires)
    }
}

/// Behavior when a fire would overlap a still-running action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOverlapPolicy {
    /// Skip the fire entirely
    #[default]
    Skip,

    /// Start regardless of running actions
    AllowAll,

    /// Remember at most one missed fire and start it when the running action
    /// finishes
    BufferOne,

    /// Cancel the running action, then start
    CancelOther,

    /// Terminate the running action, then start
    TerminateOther,
}

/// Options for creating a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Full schedule id (tenant-prefixed by the runtime facade)
    pub schedule_id: String,

    /// When to fire
    pub spec: ScheduleSpec,

    /// The workflow start executed on each fire; the engine appends a unique
    /// suffix to `action.workflow_id` per fire
    pub action: StartWorkflowOptions,

    /// Overlap behavior
    #[serde(default)]
    pub overlap: ScheduleOverlapPolicy,

    /// Create in the paused state
    #[serde(default)]
    pub paused: bool,

    /// Operator note attached to the schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Description of an existing schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDescription {
    pub schedule_id: String,
    pub spec: ScheduleSpec,
    pub paused: bool,
    pub note: Option<String>,
    /// Number of actions started so far
    pub actions_taken: u64,
    pub last_fire_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// Summary row returned by `list_schedules`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub schedule_id: String,
    pub paused: bool,
}

/// Request to run past fires of a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub overlap: ScheduleOverlapPolicy,
}

fn parse_timezone(tz: &str) -> Result<Tz, EngineError> {
    Tz::from_str(tz)
        .map_err(|_| EngineError::InvalidScheduleSpec(format!("unknown timezone: {tz}")))
}

/// Parse a 5-field cron expression
///
/// The cron crate expects a seconds field, so a fixed `0` is prepended.
fn parse_cron(expression: &str) -> Result<cron::Schedule, EngineError> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(EngineError::InvalidScheduleSpec(format!(
            "cron expression must have 5 fields, got {fields}: {expression}"
        )));
    }
    let with_seconds = format!("0 {expression}");
    cron::Schedule::from_str(&with_seconds)
        .map_err(|e| EngineError::InvalidScheduleSpec(format!("bad cron expression {expression}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_validation() {
        let spec = ScheduleSpec::Cron {
            expression: "0 9 * * *".into(),
            timezone: None,
        };
        assert!(spec.validate().is_ok());

        let bad = ScheduleSpec::Cron {
            expression: "not a cron".into(),
            timezone: None,
        };
        assert!(matches!(bad.validate(), Err(EngineError::InvalidScheduleSpec(_))));

        let six_fields = ScheduleSpec::Cron {
            expression: "0 0 9 * * *".into(),
            timezone: None,
        };
        assert!(six_fields.validate().is_err());
    }

    #[test]
    fn test_cron_next_fire() {
        let spec = ScheduleSpec::Cron {
            expression: "0 9 * * *".into(),
            timezone: None,
        };
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let next = spec.next_fire_after(after).unwrap().unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_cron_respects_timezone() {
        let spec = ScheduleSpec::Cron {
            expression: "0 9 * * *".into(),
            timezone: Some("America/New_York".into()),
        };
        // 9am New York in June is 13:00 UTC (EDT).
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = spec.next_fire_after(after).unwrap().unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let spec = ScheduleSpec::Cron {
            expression: "0 9 * * *".into(),
            timezone: Some("Mars/Olympus".into()),
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_interval_next_fire() {
        let spec = ScheduleSpec::Interval {
            every: Duration::from_secs(60),
            offset: None,
        };
        let after = Utc.timestamp_millis_opt(90_000).single().unwrap();
        let next = spec.next_fire_after(after).unwrap().unwrap();

        assert_eq!(next.timestamp_millis(), 120_000);
    }

    #[test]
    fn test_interval_offset_shifts_phase() {
        let spec = ScheduleSpec::Interval {
            every: Duration::from_secs(60),
            offset: Some(Duration::from_secs(15)),
        };
        let after = Utc.timestamp_millis_opt(60_000).single().unwrap();
        let next = spec.next_fire_after(after).unwrap().unwrap();

        assert_eq!(next.timestamp_millis(), 75_000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let spec = ScheduleSpec::Interval {
            every: Duration::ZERO,
            offset: None,
        };
        assert!(matches!(spec.validate(), Err(EngineError::InvalidScheduleSpec(_))));
    }

    #[test]
    fn test_calendar_fires_once() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let spec = ScheduleSpec::Calendar { at, timezone: None };

        let before = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(spec.next_fire_after(before).unwrap(), Some(at));

        // Exhausted after the fire time passes.
        assert_eq!(spec.next_fire_after(at).unwrap(), None);
    }

    #[test]
    fn test_fires_between() {
        let spec = ScheduleSpec::Interval {
            every: Duration::from_secs(3600),
            offset: None,
        };
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 3, 30, 0).unwrap();

        let fires = spec.fires_between(start, end).unwrap();
        assert_eq!(fires.len(), 3);
    }

    #[test]
    fn test_spec_serde_round_trip() {
        let spec = ScheduleSpec::Cron {
            expression: "30 8 * * 1-5".into(),
            timezone: Some("Europe/Berlin".into()),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: ScheduleSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, parsed);
    }
}
