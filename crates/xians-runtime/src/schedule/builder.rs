//! Fluent schedule builder
//!
//! Timing helpers compile down to a [`ScheduleSpec`]; `start()` consumes the
//! builder. From workflow code, cron and interval specs are created through
//! the `schedule.create` activity (idempotently); calendar specs are
//! client-only and rejected inside workflows.

use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};
use serde_json::Value;
use xians_engine::{
    Memo, RetryPolicy, ScheduleOptions, ScheduleOverlapPolicy, ScheduleSpec, StartWorkflowOptions,
};

use crate::context::Context;
use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::identifier;

use super::activity::{create_if_not_exists, CreateScheduleRequest};
use super::ScheduleClient;

/// Handle to a created schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleHandle {
    /// The tenant-prefixed schedule id
    pub schedule_id: String,
}

/// Builder returned by [`ScheduleClient::create`]
pub struct ScheduleBuilder<'a> {
    client: &'a ScheduleClient,
    schedule_id: String,
    spec: Option<ScheduleSpec>,
    timezone: Option<String>,
    workflow_type: Option<String>,
    input: Value,
    memo_extra: serde_json::Map<String, Value>,
    retry_policy: Option<RetryPolicy>,
    execution_timeout: Option<Duration>,
    overlap: ScheduleOverlapPolicy,
    paused: bool,
    note: Option<String>,
}

impl<'a> ScheduleBuilder<'a> {
    pub(super) fn new(client: &'a ScheduleClient, schedule_id: String) -> Self {
        Self {
            client,
            schedule_id,
            spec: None,
            timezone: None,
            workflow_type: None,
            input: Value::Null,
            memo_extra: serde_json::Map::new(),
            retry_policy: None,
            execution_timeout: None,
            overlap: ScheduleOverlapPolicy::default(),
            paused: false,
            note: None,
        }
    }

    // Timing

    /// Every day at `hour:minute`
    pub fn daily(self, hour: u8, minute: u8) -> Self {
        self.with_cron_schedule(format!("{minute} {hour} * * *"), None)
    }

    /// Every week on `weekday` at `hour:minute`
    pub fn weekly(self, weekday: Weekday, hour: u8, minute: u8) -> Self {
        let dow = weekday.num_days_from_sunday();
        self.with_cron_schedule(format!("{minute} {hour} * * {dow}"), None)
    }

    /// Every month on `day` at `hour:minute`
    pub fn monthly(self, day: u8, hour: u8, minute: u8) -> Self {
        self.with_cron_schedule(format!("{minute} {hour} {day} * *"), None)
    }

    /// Every hour at `minute`
    pub fn hourly(self, minute: u8) -> Self {
        self.with_cron_schedule(format!("{minute} * * * *"), None)
    }

    /// Monday through Friday at `hour:minute`
    pub fn weekdays(self, hour: u8, minute: u8) -> Self {
        self.with_cron_schedule(format!("{minute} {hour} * * 1-5"), None)
    }

    pub fn every_seconds(self, seconds: u64) -> Self {
        self.with_interval_schedule(Duration::from_secs(seconds), None)
    }

    pub fn every_minutes(self, minutes: u64) -> Self {
        self.with_interval_schedule(Duration::from_secs(minutes * 60), None)
    }

    pub fn every_hours(self, hours: u64) -> Self {
        self.with_interval_schedule(Duration::from_secs(hours * 3600), None)
    }

    pub fn every_days(self, days: u64) -> Self {
        self.with_interval_schedule(Duration::from_secs(days * 86_400), None)
    }

    /// Raw 5-field cron expression with optional IANA timezone
    pub fn with_cron_schedule(mut self, expression: impl Into<String>, tz: Option<String>) -> Self {
        if tz.is_some() {
            self.timezone = tz;
        }
        self.spec = Some(ScheduleSpec::Cron {
            expression: expression.into(),
            timezone: None,
        });
        self
    }

    /// Fixed interval with optional phase offset
    pub fn with_interval_schedule(mut self, every: Duration, offset: Option<Duration>) -> Self {
        self.spec = Some(ScheduleSpec::Interval { every, offset });
        self
    }

    /// One-shot fire at a point in time
    pub fn with_calendar_schedule(mut self, at: DateTime<Utc>, tz: Option<String>) -> Self {
        if tz.is_some() {
            self.timezone = tz;
        }
        self.spec = Some(ScheduleSpec::Calendar { at, timezone: None });
        self
    }

    /// Timezone applied to cron/calendar specs; default UTC
    pub fn in_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    // Target and payload

    /// Workflow type the schedule starts; defaults to the ambient workflow
    /// type
    pub fn for_workflow(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    /// Input passed to every scheduled start
    pub fn with_input(mut self, input: &(impl serde::Serialize + ?Sized)) -> Self {
        self.input = serde_json::to_value(input).unwrap_or(Value::Null);
        self
    }

    /// Extra memo entries propagated to scheduled starts
    pub fn with_memo(mut self, memo: serde_json::Map<String, Value>) -> Self {
        self.memo_extra = memo;
        self
    }

    // Policy

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Whole-execution timeout for each scheduled start
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_overlap_policy(mut self, policy: ScheduleOverlapPolicy) -> Self {
        self.overlap = policy;
        self
    }

    pub fn skip_if_running(self) -> Self {
        self.with_overlap_policy(ScheduleOverlapPolicy::Skip)
    }

    pub fn allow_overlap(self) -> Self {
        self.with_overlap_policy(ScheduleOverlapPolicy::AllowAll)
    }

    pub fn buffer_one(self) -> Self {
        self.with_overlap_policy(ScheduleOverlapPolicy::BufferOne)
    }

    pub fn cancel_other(self) -> Self {
        self.with_overlap_policy(ScheduleOverlapPolicy::CancelOther)
    }

    pub fn terminate_other(self) -> Self {
        self.with_overlap_policy(ScheduleOverlapPolicy::TerminateOther)
    }

    /// Create in the paused state with an optional note
    pub fn start_paused(mut self, paused: bool, note: Option<String>) -> Self {
        self.paused = paused;
        if note.is_some() {
            self.note = note;
        }
        self
    }

    /// Create the schedule
    ///
    /// Outside workflows this is a direct engine call and a duplicate id
    /// fails with `ScheduleAlreadyExists`. Inside workflows, cron and
    /// interval specs go through the `schedule.create` activity with
    /// create-if-not-exists semantics; other specs are rejected with
    /// `UnsupportedInWorkflow`.
    pub async fn start(self) -> Result<ScheduleHandle, XiansError> {
        let tenant = self.client.tenant()?;
        let schedule_id = format!("{tenant}:{}", self.schedule_id);

        let spec = self.resolved_spec()?;
        let workflow_type = match self.workflow_type {
            Some(workflow_type) => workflow_type,
            None => Context::workflow_type().map_err(|_| {
                XiansError::Configuration(
                    "for_workflow is required when no ambient workflow type exists".into(),
                )
            })?,
        };

        let system_scoped = self
            .client
            .registry
            .find_workflow(&workflow_type)
            .map(|(agent, _)| agent.system_scoped)
            .unwrap_or(false);
        let task_queue = identifier::task_queue(&workflow_type, system_scoped, Some(&tenant))?;
        let action_workflow_id =
            identifier::build(&tenant, &workflow_type, Some(&self.schedule_id));

        let mut memo = Memo::for_tenant(&tenant, system_scoped);
        memo.extra = self.memo_extra;

        let mut action =
            StartWorkflowOptions::new(&workflow_type, &action_workflow_id, &task_queue, self.input)
                .with_memo(memo);
        if let Some(policy) = self.retry_policy {
            action = action.with_retry_policy(policy);
        }
        if let Some(timeout) = self.execution_timeout {
            action = action.with_execution_timeout(timeout);
        }

        let options = ScheduleOptions {
            schedule_id: schedule_id.clone(),
            spec,
            action,
            overlap: self.overlap,
            paused: self.paused,
            note: self.note,
        };

        if Context::is_in_workflow() {
            let activity_backed = matches!(
                options.spec,
                ScheduleSpec::Cron { .. } | ScheduleSpec::Interval { .. }
            );
            if !activity_backed {
                return Err(XiansError::UnsupportedInWorkflow(
                    "calendar schedules cannot be created from workflow code".into(),
                ));
            }
            let request = CreateScheduleRequest { options };
            let engine = self.client.engine.clone();
            executor::execute(activity_names::SCHEDULE_CREATE, &request, async {
                create_if_not_exists(&engine, &request).await?;
                Ok(Value::Null)
            })
            .await
            .map(|_: Value| ())?;
        } else {
            self.client.engine.engine().create_schedule(options).await?;
        }

        Ok(ScheduleHandle { schedule_id })
    }

    /// Fold the pending timezone into the spec
    fn resolved_spec(&self) -> Result<ScheduleSpec, XiansError> {
        let spec = self.spec.clone().ok_or_else(|| {
            XiansError::InvalidScheduleSpec("no timing was configured".into())
        })?;
        Ok(match spec {
            ScheduleSpec::Cron { expression, .. } => ScheduleSpec::Cron {
                expression,
                timezone: self.timezone.clone(),
            },
            ScheduleSpec::Calendar { at, .. } => ScheduleSpec::Calendar {
                at,
                timezone: self.timezone.clone(),
            },
            interval => interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::client::EngineClient;
    use std::sync::Arc;
    use xians_engine::InMemoryEngine;

    fn client() -> ScheduleClient {
        ScheduleClient::new(
            EngineClient::new(Arc::new(InMemoryEngine::new())),
            Arc::new(AgentRegistry::new()),
            Some("acme".into()),
        )
    }

    #[test]
    fn test_timing_helpers_build_cron_expressions() {
        let client = client();
        let cases = [
            (client.create("a").daily(9, 0), "0 9 * * *"),
            (client.create("b").hourly(15), "15 * * * *"),
            (client.create("c").weekdays(8, 30), "30 8 * * 1-5"),
            (client.create("d").monthly(1, 0, 0), "0 0 1 * *"),
            (client.create("e").weekly(Weekday::Mon, 9, 0), "0 9 * * 1"),
        ];
        for (builder, expected) in cases {
            match builder.resolved_spec().unwrap() {
                ScheduleSpec::Cron { expression, .. } => assert_eq!(expression, expected),
                other => panic!("expected cron spec, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_interval_helpers() {
        let client = client();
        match client.create("i").every_minutes(5).resolved_spec().unwrap() {
            ScheduleSpec::Interval { every, offset } => {
                assert_eq!(every, Duration::from_secs(300));
                assert_eq!(offset, None);
            }
            other => panic!("expected interval spec, got {other:?}"),
        }
    }

    #[test]
    fn test_timezone_applies_to_cron() {
        let client = client();
        let builder = client.create("tz").daily(9, 0).in_timezone("Europe/Berlin");
        match builder.resolved_spec().unwrap() {
            ScheduleSpec::Cron { timezone, .. } => {
                assert_eq!(timezone.as_deref(), Some("Europe/Berlin"));
            }
            other => panic!("expected cron spec, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_timing_is_invalid() {
        let client = client();
        let err = client.create("x").resolved_spec().unwrap_err();
        assert!(matches!(err, XiansError::InvalidScheduleSpec(_)));
    }
}
