//! Schedule storage and firing for the in-memory engine

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::options::{IdReusePolicy, ParentClosePolicy, StartWorkflowOptions, WorkflowExecutionStatus};
use crate::schedule::{
    BackfillRequest, ScheduleDescription, ScheduleOptions, ScheduleOverlapPolicy, ScheduleSummary,
};

use super::EngineInner;

pub(crate) struct ScheduleCell {
    pub(crate) options: ScheduleOptions,
    pub(crate) paused: AtomicBool,
    pub(crate) note: Mutex<Option<String>>,
    pub(crate) actions_taken: AtomicU64,
    pub(crate) last_fire: Mutex<Option<DateTime<Utc>>>,
    /// Workflow id of the most recently started action, for overlap checks
    last_started: Mutex<Option<String>>,
    stop: watch::Sender<bool>,
}

pub(crate) fn create(engine: &Arc<EngineInner>, options: ScheduleOptions) -> Result<(), EngineError> {
    options.spec.validate()?;

    let schedule_id = options.schedule_id.clone();
    let (stop_tx, stop_rx) = watch::channel(false);
    let cell = Arc::new(ScheduleCell {
        paused: AtomicBool::new(options.paused),
        note: Mutex::new(options.note.clone()),
        actions_taken: AtomicU64::new(0),
        last_fire: Mutex::new(None),
        last_started: Mutex::new(None),
        stop: stop_tx,
        options,
    });

    // Entry API keeps the existence check and the insert atomic.
    match engine.schedules.entry(schedule_id.clone()) {
        dashmap::mapref::entry::Entry::Occupied(_) => {
            return Err(EngineError::ScheduleAlreadyExists(schedule_id));
        }
        dashmap::mapref::entry::Entry::Vacant(v) => {
            v.insert(cell.clone());
        }
    }

    debug!(schedule_id = %schedule_id, "created schedule");
    tokio::spawn(drive(engine.clone(), cell, stop_rx));
    Ok(())
}

/// Driver loop: sleep to the next fire time, then start the action
async fn drive(engine: Arc<EngineInner>, cell: Arc<ScheduleCell>, mut stop: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let next = match cell.options.spec.next_fire_after(now) {
            Ok(Some(next)) => next,
            Ok(None) => return,
            Err(e) => {
                warn!(schedule_id = %cell.options.schedule_id, error = %e, "schedule spec error");
                return;
            }
        };

        let delay = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return;
                }
                continue;
            }
        }

        if cell.paused.load(Ordering::SeqCst) {
            continue;
        }
        fire(&engine, &cell, cell.options.overlap).await;
    }
}

/// Start one schedule action, honoring the overlap policy
pub(crate) async fn fire(
    engine: &Arc<EngineInner>,
    cell: &Arc<ScheduleCell>,
    overlap: ScheduleOverlapPolicy,
) {
    let previous = cell.last_started.lock().clone();
    let previous_running = previous
        .as_deref()
        .and_then(|id| engine.workflows.get(id))
        .map(|c| matches!(*c.status.read(), WorkflowExecutionStatus::Running))
        .unwrap_or(false);

    if previous_running {
        match overlap {
            ScheduleOverlapPolicy::Skip => {
                debug!(schedule_id = %cell.options.schedule_id, "fire skipped: action still running");
                return;
            }
            ScheduleOverlapPolicy::AllowAll => {}
            ScheduleOverlapPolicy::BufferOne => {
                let engine = engine.clone();
                let cell = cell.clone();
                let previous = previous.clone().unwrap();
                tokio::spawn(async move {
                    if let Some(prev) = engine.workflows.get(&previous).map(|c| c.clone()) {
                        let mut rx = prev.result_tx.subscribe();
                        while rx.borrow().is_none() {
                            if rx.changed().await.is_err() {
                                return;
                            }
                        }
                    }
                    start_action(&engine, &cell).await;
                });
                return;
            }
            ScheduleOverlapPolicy::CancelOther | ScheduleOverlapPolicy::TerminateOther => {
                if let Some(prev) = previous.as_deref() {
                    engine.cancel_internal(prev, "superseded by schedule fire");
                }
            }
        }
    }

    start_action(engine, cell).await;
}

async fn start_action(engine: &Arc<EngineInner>, cell: &Arc<ScheduleCell>) {
    let seq = cell.actions_taken.fetch_add(1, Ordering::SeqCst) + 1;
    let action = &cell.options.action;
    let start = StartWorkflowOptions {
        workflow_type: action.workflow_type.clone(),
        workflow_id: format!("{}:{}", action.workflow_id, seq),
        task_queue: action.task_queue.clone(),
        input: action.input.clone(),
        memo: action.memo.clone(),
        id_reuse_policy: IdReusePolicy::AllowIfClosed,
        retry_policy: action.retry_policy.clone(),
        execution_timeout: action.execution_timeout,
    };

    *cell.last_fire.lock() = Some(Utc::now());
    match engine.start_internal(start, None, ParentClosePolicy::Abandon).await {
        Ok(handle) => {
            *cell.last_started.lock() = Some(handle.workflow_id);
        }
        Err(e) => {
            warn!(
                schedule_id = %cell.options.schedule_id,
                error = %e,
                "schedule action failed to start"
            );
        }
    }
}

fn cell(engine: &Arc<EngineInner>, schedule_id: &str) -> Result<Arc<ScheduleCell>, EngineError> {
    engine
        .schedules
        .get(schedule_id)
        .map(|c| c.clone())
        .ok_or_else(|| EngineError::ScheduleNotFound(schedule_id.to_string()))
}

pub(crate) fn describe(
    engine: &Arc<EngineInner>,
    schedule_id: &str,
) -> Result<ScheduleDescription, EngineError> {
    let cell = cell(engine, schedule_id)?;
    let next = cell.options.spec.next_fire_after(Utc::now())?;
    let description = ScheduleDescription {
        schedule_id: cell.options.schedule_id.clone(),
        spec: cell.options.spec.clone(),
        paused: cell.paused.load(Ordering::SeqCst),
        note: cell.note.lock().clone(),
        actions_taken: cell.actions_taken.load(Ordering::SeqCst),
        last_fire_at: *cell.last_fire.lock(),
        next_fire_at: next,
    };
    Ok(description)
}

pub(crate) fn set_paused(
    engine: &Arc<EngineInner>,
    schedule_id: &str,
    paused: bool,
    note: Option<String>,
) -> Result<(), EngineError> {
    let cell = cell(engine, schedule_id)?;
    cell.paused.store(paused, Ordering::SeqCst);
    if note.is_some() {
        *cell.note.lock() = note;
    }
    Ok(())
}

pub(crate) async fn trigger(engine: &Arc<EngineInner>, schedule_id: &str) -> Result<(), EngineError> {
    let cell = cell(engine, schedule_id)?;
    fire(engine, &cell, cell.options.overlap).await;
    Ok(())
}

pub(crate) fn delete(engine: &Arc<EngineInner>, schedule_id: &str) -> Result<(), EngineError> {
    let (_, cell) = engine
        .schedules
        .remove(schedule_id)
        .ok_or_else(|| EngineError::ScheduleNotFound(schedule_id.to_string()))?;
    let _ = cell.stop.send(true);
    Ok(())
}

pub(crate) fn list(engine: &Arc<EngineInner>, prefix: Option<&str>) -> Vec<ScheduleSummary> {
    let mut rows: Vec<ScheduleSummary> = engine
        .schedules
        .iter()
        .filter(|entry| prefix.map(|p| entry.key().starts_with(p)).unwrap_or(true))
        .map(|entry| ScheduleSummary {
            schedule_id: entry.key().clone(),
            paused: entry.value().paused.load(Ordering::SeqCst),
        })
        .collect();
    rows.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
    rows
}

pub(crate) async fn backfill(
    engine: &Arc<EngineInner>,
    schedule_id: &str,
    request: BackfillRequest,
) -> Result<(), EngineError> {
    let cell = cell(engine, schedule_id)?;
    let fires = cell.options.spec.fires_between(request.start, request.end)?;
    debug!(
        schedule_id,
        fires = fires.len(),
        "backfilling schedule"
    );
    for _ in fires {
        fire(engine, &cell, request.overlap).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::engine::{WorkerOptions, WorkflowEngine};
    use crate::memory::InMemoryEngine;
    use crate::schedule::ScheduleSpec;
    use crate::workflow::{workflow_factory, WorkflowError, WorkflowRun};
    use serde_json::json;
    use std::time::Duration;

    struct NoopWorkflow;

    #[async_trait::async_trait]
    impl WorkflowRun for NoopWorkflow {
        async fn run(
            &self,
            _ctx: WorkflowContext,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, WorkflowError> {
            Ok(json!(null))
        }
    }

    fn schedule_options(id: &str) -> ScheduleOptions {
        ScheduleOptions {
            schedule_id: id.to_string(),
            spec: ScheduleSpec::Interval {
                every: Duration::from_secs(3600),
                offset: None,
            },
            action: StartWorkflowOptions::new(
                "Test:Noop",
                format!("acme:Test:Noop:{id}"),
                "sched-queue",
                json!({}),
            ),
            overlap: ScheduleOverlapPolicy::Skip,
            paused: false,
            note: None,
        }
    }

    async fn engine() -> InMemoryEngine {
        let engine = InMemoryEngine::new();
        let worker = engine.worker(WorkerOptions::new("sched-queue")).unwrap();
        worker.register_workflow("Test:Noop", workflow_factory(|| NoopWorkflow));
        worker.register_activity(
            "noop",
            crate::activity::activity_handler(|_ctx, _input| async move { Ok(json!(null)) }),
        );
        engine
    }

    #[tokio::test]
    async fn test_duplicate_schedule_rejected() {
        let engine = engine().await;
        engine.create_schedule(schedule_options("s1")).await.unwrap();

        let err = engine.create_schedule(schedule_options("s1")).await.unwrap_err();
        assert!(matches!(err, EngineError::ScheduleAlreadyExists(id) if id == "s1"));
    }

    #[tokio::test]
    async fn test_trigger_starts_action() {
        let engine = engine().await;
        engine.create_schedule(schedule_options("s2")).await.unwrap();

        engine.trigger_schedule("s2").await.unwrap();

        let desc = engine.describe_schedule("s2").await.unwrap();
        assert_eq!(desc.actions_taken, 1);
        assert!(desc.last_fire_at.is_some());
    }

    #[tokio::test]
    async fn test_pause_and_note() {
        let engine = engine().await;
        engine.create_schedule(schedule_options("s3")).await.unwrap();

        engine
            .pause_schedule("s3", Some("maintenance".into()))
            .await
            .unwrap();
        let desc = engine.describe_schedule("s3").await.unwrap();
        assert!(desc.paused);
        assert_eq!(desc.note.as_deref(), Some("maintenance"));

        engine.unpause_schedule("s3", None).await.unwrap();
        let desc = engine.describe_schedule("s3").await.unwrap();
        assert!(!desc.paused);
        assert_eq!(desc.note.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let engine = engine().await;
        engine.create_schedule(schedule_options("acme:a")).await.unwrap();
        engine.create_schedule(schedule_options("acme:b")).await.unwrap();
        engine.create_schedule(schedule_options("contoso:c")).await.unwrap();

        let rows = engine.list_schedules(Some("acme:")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.schedule_id.starts_with("acme:")));
    }

    #[tokio::test]
    async fn test_delete_removes_schedule() {
        let engine = engine().await;
        engine.create_schedule(schedule_options("s4")).await.unwrap();
        engine.delete_schedule("s4").await.unwrap();

        let err = engine.describe_schedule("s4").await.unwrap_err();
        assert!(matches!(err, EngineError::ScheduleNotFound(_)));
    }
}
