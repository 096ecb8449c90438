//! In-memory engine
//!
//! A single-process implementation of the engine trait surface, used by the
//! test harness and local mode. Signals and updates are serialized per
//! workflow through an async mutex, which stands in for history order.
//! Timers ride on tokio time, so tests running under
//! `#[tokio::test(start_paused = true)]` get deterministic clocks.
//!
//! Not implemented here: replay. Workflow state lives for the lifetime of
//! the process; `now()`/`new_guid()` hand out live values that a durable
//! engine would record and substitute.

mod schedules;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{
    ActivityContext, ActivityError, ActivityHandler, ActivityOptions,
};
use crate::context::{WorkflowApi, WorkflowContext, WorkflowInfo};
use crate::engine::{EngineWorker, WorkerOptions, WorkflowEngine};
use crate::error::EngineError;
use crate::options::{
    ChildWorkflowOptions, IdReusePolicy, ParentClosePolicy, StartWorkflowOptions,
    WorkflowDescription, WorkflowExecutionStatus, WorkflowHandle,
};
use crate::schedule::{
    BackfillRequest, ScheduleDescription, ScheduleOptions, ScheduleSummary,
};
use crate::workflow::{SignalContext, WorkflowError, WorkflowRun};

use schedules::ScheduleCell;

/// A recorded activity invocation, for assertions on dispatch behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityExecution {
    pub task_queue: String,
    pub activity_type: String,
    /// Owning workflow id; `None` for direct client dispatch
    pub workflow_id: Option<String>,
}

pub(crate) struct QueueState {
    pub(crate) workflows: RwLock<HashMap<String, crate::workflow::WorkflowFactory>>,
    pub(crate) activities: RwLock<HashMap<String, ActivityHandler>>,
    pub(crate) semaphore: RwLock<Arc<Semaphore>>,
    pub(crate) concurrency: RwLock<usize>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            activities: RwLock::new(HashMap::new()),
            semaphore: RwLock::new(Arc::new(Semaphore::new(16))),
            concurrency: RwLock::new(16),
        }
    }
}

pub(crate) struct WorkflowCell {
    pub(crate) info: WorkflowInfo,
    pub(crate) instance: Arc<dyn WorkflowRun>,
    /// Serializes signal/update delivery; stands in for history order
    handler_lock: tokio::sync::Mutex<()>,
    pub(crate) state_changed: Notify,
    pub(crate) status: RwLock<WorkflowExecutionStatus>,
    result_tx: watch::Sender<Option<Result<serde_json::Value, WorkflowError>>>,
    cancelled: watch::Sender<bool>,
    children: Mutex<Vec<(String, ParentClosePolicy)>>,
}

impl WorkflowCell {
    fn is_closed(&self) -> bool {
        !matches!(*self.status.read(), WorkflowExecutionStatus::Running)
    }
}

pub(crate) struct EngineInner {
    pub(crate) workflows: DashMap<String, Arc<WorkflowCell>>,
    pub(crate) queues: DashMap<String, Arc<QueueState>>,
    pub(crate) schedules: DashMap<String, Arc<ScheduleCell>>,
    activity_log: Mutex<Vec<ActivityExecution>>,
}

/// The in-memory engine
///
/// # Example
///
/// ```ignore
/// let engine = InMemoryEngine::new();
/// let worker = engine.worker(WorkerOptions::new("acme:MyAgent:Chat"))?;
/// worker.register_workflow("MyAgent:Chat", factory);
/// worker.register_activity("message.send", handler);
///
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// tokio::spawn(async move { worker.run(shutdown_rx).await });
/// ```
#[derive(Clone)]
pub struct InMemoryEngine {
    inner: Arc<EngineInner>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                workflows: DashMap::new(),
                queues: DashMap::new(),
                schedules: DashMap::new(),
                activity_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshot of every activity invocation dispatched so far
    pub fn activity_executions(&self) -> Vec<ActivityExecution> {
        self.inner.activity_log.lock().clone()
    }
}

impl EngineInner {
    fn queue(&self, task_queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(task_queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }

    fn cell(&self, workflow_id: &str) -> Result<Arc<WorkflowCell>, EngineError> {
        self.workflows
            .get(workflow_id)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Start a workflow; resolves once the run body has been polled to its
    /// first suspension point, so immediate signals and queries observe
    /// initialized state.
    pub(crate) async fn start_internal(
        self: &Arc<Self>,
        options: StartWorkflowOptions,
        parent: Option<&Arc<WorkflowCell>>,
        parent_close: ParentClosePolicy,
    ) -> Result<WorkflowHandle, EngineError> {
        let queue = self
            .queues
            .get(&options.task_queue)
            .map(|q| q.clone())
            .ok_or_else(|| EngineError::NoWorkerForQueue(options.task_queue.clone()))?;

        let factory = queue
            .workflows
            .read()
            .get(&options.workflow_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflowType {
                workflow_type: options.workflow_type.clone(),
                task_queue: options.task_queue.clone(),
            })?;

        if let Some(existing) = self.workflows.get(&options.workflow_id) {
            let closed = existing.is_closed();
            let allowed = match options.id_reuse_policy {
                IdReusePolicy::Allow => true,
                IdReusePolicy::AllowIfClosed => closed,
                IdReusePolicy::Reject => false,
            };
            if !allowed {
                return Err(EngineError::WorkflowAlreadyStarted(
                    options.workflow_id.clone(),
                ));
            }
        }

        let instance = factory();
        let (result_tx, _) = watch::channel(None);
        let (cancelled_tx, _) = watch::channel(false);
        let cell = Arc::new(WorkflowCell {
            info: WorkflowInfo {
                workflow_id: options.workflow_id.clone(),
                run_id: Uuid::now_v7(),
                workflow_type: options.workflow_type.clone(),
                task_queue: options.task_queue.clone(),
                memo: options.memo.clone(),
            },
            instance: instance.clone(),
            handler_lock: tokio::sync::Mutex::new(()),
            state_changed: Notify::new(),
            status: RwLock::new(WorkflowExecutionStatus::Running),
            result_tx,
            cancelled: cancelled_tx,
            children: Mutex::new(Vec::new()),
        });

        self.workflows
            .insert(options.workflow_id.clone(), cell.clone());
        if let Some(parent) = parent {
            parent
                .children
                .lock()
                .push((options.workflow_id.clone(), parent_close));
        }

        let handle = WorkflowHandle {
            workflow_id: cell.info.workflow_id.clone(),
            run_id: cell.info.run_id,
        };

        info!(
            workflow_id = %cell.info.workflow_id,
            workflow_type = %cell.info.workflow_type,
            task_queue = %cell.info.task_queue,
            "starting workflow"
        );

        let engine = self.clone();
        let input = options.input.clone();
        let execution_timeout = options.execution_timeout;
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let api = Arc::new(MemoryWorkflowApi {
                engine: engine.clone(),
                cell: cell.clone(),
            });
            let ctx = WorkflowContext::new(api);

            let mut cancel_rx = cell.cancelled.subscribe();
            let body = instance.run(ctx, input);

            let outcome_fut = async {
                tokio::select! {
                    result = async {
                        match execution_timeout {
                            Some(t) => match tokio::time::timeout(t, body).await {
                                Ok(r) => r,
                                Err(_) => Err(WorkflowError::new("workflow execution timed out")
                                    .with_code("timeout")),
                            },
                            None => body.await,
                        }
                    } => result,
                    _ = async {
                        loop {
                            if *cancel_rx.borrow() {
                                break;
                            }
                            if cancel_rx.changed().await.is_err() {
                                std::future::pending::<()>().await;
                            }
                        }
                    } => Err(WorkflowError::new("workflow cancelled").with_code("cancelled")),
                }
            };
            tokio::pin!(outcome_fut);

            // First poll runs the body to its first await before the caller
            // sees the handle.
            let first = futures::poll!(outcome_fut.as_mut());
            let _ = started_tx.send(());
            let outcome = match first {
                std::task::Poll::Ready(outcome) => outcome,
                std::task::Poll::Pending => outcome_fut.await,
            };

            let status = match &outcome {
                Ok(_) => WorkflowExecutionStatus::Completed,
                Err(e) if e.code.as_deref() == Some("cancelled") => {
                    WorkflowExecutionStatus::Cancelled
                }
                Err(_) => WorkflowExecutionStatus::Failed,
            };
            *cell.status.write() = status;

            match &outcome {
                Ok(_) => debug!(workflow_id = %cell.info.workflow_id, "workflow completed"),
                Err(e) => warn!(
                    workflow_id = %cell.info.workflow_id,
                    error = %e,
                    "workflow closed with failure"
                ),
            }

            // Close children per their parent-close policy; abandoned
            // children keep running.
            let children = cell.children.lock().clone();
            for (child_id, policy) in children {
                match policy {
                    ParentClosePolicy::Abandon => {}
                    ParentClosePolicy::Terminate | ParentClosePolicy::RequestCancel => {
                        engine.cancel_internal(&child_id, "parent closed");
                    }
                }
            }

            let _ = cell.result_tx.send(Some(outcome));
            cell.state_changed.notify_waiters();
        });

        let _ = started_rx.await;
        Ok(handle)
    }

    fn cancel_internal(&self, workflow_id: &str, reason: &str) {
        if let Some(cell) = self.workflows.get(workflow_id) {
            if !cell.is_closed() {
                debug!(workflow_id, reason, "cancelling workflow");
                let _ = cell.cancelled.send(true);
                cell.state_changed.notify_waiters();
            }
        }
    }

    /// Execute one activity invocation with retries, recording it once
    pub(crate) async fn run_activity(
        self: &Arc<Self>,
        task_queue: &str,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
        workflow: Option<&WorkflowInfo>,
    ) -> Result<serde_json::Value, ActivityError> {
        let queue = match self.queues.get(task_queue) {
            Some(q) => q.clone(),
            None => {
                return Err(ActivityError::non_retryable(format!(
                    "no worker registered for task queue: {task_queue}"
                )))
            }
        };
        let handler = match queue.activities.read().get(activity_type).cloned() {
            Some(h) => h,
            None => {
                return Err(ActivityError::non_retryable(format!(
                    "unknown activity type {activity_type} on task queue {task_queue}"
                )))
            }
        };

        self.activity_log.lock().push(ActivityExecution {
            task_queue: task_queue.to_string(),
            activity_type: activity_type.to_string(),
            workflow_id: workflow.map(|w| w.workflow_id.clone()),
        });

        let semaphore = queue.semaphore.read().clone();
        let mut attempt: u32 = 1;
        loop {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ActivityError::non_retryable("engine is shutting down"))?;

            let ctx = ActivityContext {
                activity_type: activity_type.to_string(),
                task_queue: task_queue.to_string(),
                attempt,
                max_attempts: options.retry.max_attempts,
                workflow_id: workflow.map(|w| w.workflow_id.clone()),
                workflow_type: workflow.map(|w| w.workflow_type.clone()),
                memo: workflow.map(|w| w.memo.clone()).unwrap_or_default(),
            };

            let fut = handler(ctx, input.clone());
            let attempt_result = tokio::time::timeout(options.start_to_close, fut).await;
            drop(permit);

            let err = match attempt_result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ActivityError::retryable(format!(
                    "activity {activity_type} attempt {attempt} timed out after {:?}",
                    options.start_to_close
                )),
            };

            if !err.retryable || !options.retry.allows_retry(attempt) {
                error!(
                    activity_type,
                    task_queue,
                    attempt,
                    error = %err,
                    "activity failed"
                );
                return Err(err);
            }

            warn!(
                activity_type,
                task_queue,
                attempt,
                error = %err,
                "activity attempt failed, retrying"
            );
            attempt += 1;
            tokio::time::sleep(options.retry.delay_for_attempt(attempt)).await;
        }
    }
}

struct MemoryWorkflowApi {
    engine: Arc<EngineInner>,
    cell: Arc<WorkflowCell>,
}

#[async_trait::async_trait]
impl WorkflowApi for MemoryWorkflowApi {
    fn info(&self) -> &WorkflowInfo {
        &self.cell.info
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_guid(&self) -> Uuid {
        crate::workflow::generate_guid()
    }

    fn random(&self) -> f64 {
        rand::thread_rng().gen()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }

    async fn execute_activity(
        &self,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, ActivityError> {
        self.engine
            .run_activity(
                &self.cell.info.task_queue,
                activity_type,
                input,
                options,
                Some(&self.cell.info),
            )
            .await
    }

    async fn wait_condition(
        &self,
        predicate: &(dyn Fn() -> bool + Send + Sync),
        timeout: Option<Duration>,
    ) -> bool {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            // Register interest before checking, so a notify between the
            // check and the await is not lost.
            let notified = self.cell.state_changed.notified();
            if predicate() {
                return true;
            }
            match deadline {
                Some(d) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(d) => return predicate(),
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn start_child_workflow(
        &self,
        options: ChildWorkflowOptions,
    ) -> Result<WorkflowHandle, EngineError> {
        let start = StartWorkflowOptions {
            workflow_type: options.workflow_type,
            workflow_id: options.workflow_id,
            task_queue: options
                .task_queue
                .unwrap_or_else(|| self.cell.info.task_queue.clone()),
            input: options.input,
            memo: options.memo.unwrap_or_else(|| self.cell.info.memo.clone()),
            id_reuse_policy: IdReusePolicy::default(),
            retry_policy: None,
            execution_timeout: options.execution_timeout,
        };
        self.engine
            .start_internal(start, Some(&self.cell), options.parent_close)
            .await
    }

    async fn signal_external(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        signal_cell(&self.engine.cell(workflow_id)?, name, payload).await;
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        *self.cell.cancelled.subscribe().borrow()
    }
}

/// Deliver a signal under the cell's handler lock; errors are logged, never
/// returned (signals have no return channel)
async fn signal_cell(cell: &Arc<WorkflowCell>, name: &str, payload: serde_json::Value) {
    if cell.is_closed() {
        warn!(
            workflow_id = %cell.info.workflow_id,
            signal = name,
            "signal dropped: workflow is closed"
        );
        return;
    }
    {
        let _guard = cell.handler_lock.lock().await;
        let ctx = SignalContext {
            workflow_id: cell.info.workflow_id.clone(),
            now: Utc::now(),
        };
        if let Err(e) = cell.instance.handle_signal(&ctx, name, payload) {
            warn!(
                workflow_id = %cell.info.workflow_id,
                signal = name,
                error = %e,
                "signal handler rejected signal"
            );
        }
    }
    cell.state_changed.notify_waiters();
}

#[async_trait::async_trait]
impl WorkflowEngine for InMemoryEngine {
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
    ) -> Result<WorkflowHandle, EngineError> {
        self.inner
            .start_internal(options, None, ParentClosePolicy::Abandon)
            .await
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        signal_cell(&self.inner.cell(workflow_id)?, name, payload).await;
        Ok(())
    }

    async fn query_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let cell = self.inner.cell(workflow_id)?;
        cell.instance
            .handle_query(name, args)
            .map_err(|e| EngineError::QueryFailed {
                name: name.to_string(),
                message: e.message,
            })
    }

    async fn update_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let cell = self.inner.cell(workflow_id)?;
        if cell.is_closed() {
            return Err(EngineError::UpdateFailed {
                name: name.to_string(),
                message: "workflow is closed".into(),
            });
        }

        cell.instance
            .validate_update(name, &args)
            .map_err(|e| EngineError::UpdateRejected {
                name: name.to_string(),
                reason: e.message,
            })?;

        let result = {
            let _guard = cell.handler_lock.lock().await;
            let ctx = SignalContext {
                workflow_id: cell.info.workflow_id.clone(),
                now: Utc::now(),
            };
            cell.instance.handle_update(&ctx, name, args)
        };
        cell.state_changed.notify_waiters();

        result.map_err(|e| EngineError::UpdateFailed {
            name: name.to_string(),
            message: e.message,
        })
    }

    async fn describe_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowDescription, EngineError> {
        let cell = self.inner.cell(workflow_id)?;
        let description = WorkflowDescription {
            workflow_id: cell.info.workflow_id.clone(),
            run_id: cell.info.run_id,
            workflow_type: cell.info.workflow_type.clone(),
            task_queue: cell.info.task_queue.clone(),
            status: *cell.status.read(),
            memo: cell.info.memo.clone(),
        };
        Ok(description)
    }

    async fn workflow_result(&self, workflow_id: &str) -> Result<serde_json::Value, EngineError> {
        let cell = self.inner.cell(workflow_id)?;
        let mut rx = cell.result_tx.subscribe();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return match outcome {
                    Ok(value) => Ok(value),
                    Err(e) if e.code.as_deref() == Some("cancelled") => {
                        Err(EngineError::WorkflowCancelled(workflow_id.to_string()))
                    }
                    Err(e) => Err(EngineError::WorkflowFailed(e)),
                };
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::Shutdown);
            }
        }
    }

    async fn cancel_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), EngineError> {
        let _ = self.inner.cell(workflow_id)?;
        self.inner.cancel_internal(workflow_id, reason);
        Ok(())
    }

    async fn execute_activity(
        &self,
        task_queue: &str,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, EngineError> {
        self.inner
            .run_activity(task_queue, activity_type, input, options, None)
            .await
            .map_err(|e| EngineError::ActivityFailed {
                activity_type: activity_type.to_string(),
                message: e.message,
            })
    }

    async fn create_schedule(&self, options: ScheduleOptions) -> Result<(), EngineError> {
        schedules::create(&self.inner, options)
    }

    async fn describe_schedule(
        &self,
        schedule_id: &str,
    ) -> Result<ScheduleDescription, EngineError> {
        schedules::describe(&self.inner, schedule_id)
    }

    async fn pause_schedule(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        schedules::set_paused(&self.inner, schedule_id, true, note)
    }

    async fn unpause_schedule(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        schedules::set_paused(&self.inner, schedule_id, false, note)
    }

    async fn trigger_schedule(&self, schedule_id: &str) -> Result<(), EngineError> {
        schedules::trigger(&self.inner, schedule_id).await
    }

    async fn delete_schedule(&self, schedule_id: &str) -> Result<(), EngineError> {
        schedules::delete(&self.inner, schedule_id)
    }

    async fn list_schedules(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<ScheduleSummary>, EngineError> {
        Ok(schedules::list(&self.inner, prefix))
    }

    async fn backfill_schedule(
        &self,
        schedule_id: &str,
        request: BackfillRequest,
    ) -> Result<(), EngineError> {
        schedules::backfill(&self.inner, schedule_id, request).await
    }

    fn worker(&self, options: WorkerOptions) -> Result<Arc<dyn EngineWorker>, EngineError> {
        let queue = self.inner.queue(&options.task_queue);
        {
            let mut concurrency = queue.concurrency.write();
            if options.max_concurrent_activities > *concurrency {
                *concurrency = options.max_concurrent_activities;
                *queue.semaphore.write() = Arc::new(Semaphore::new(*concurrency));
            }
        }
        Ok(Arc::new(MemoryWorker {
            task_queue: options.task_queue.clone(),
            identity: options.identity,
            queue,
        }))
    }
}

struct MemoryWorker {
    task_queue: String,
    identity: String,
    queue: Arc<QueueState>,
}

#[async_trait::async_trait]
impl EngineWorker for MemoryWorker {
    fn register_workflow(&self, workflow_type: &str, factory: crate::workflow::WorkflowFactory) {
        self.queue
            .workflows
            .write()
            .insert(workflow_type.to_string(), factory);
        info!(
            task_queue = %self.task_queue,
            workflow_type,
            "registered workflow type"
        );
    }

    fn register_activity(&self, activity_type: &str, handler: ActivityHandler) {
        self.queue
            .activities
            .write()
            .insert(activity_type.to_string(), handler);
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        info!(
            task_queue = %self.task_queue,
            identity = %self.identity,
            "worker running"
        );
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!(task_queue = %self.task_queue, identity = %self.identity, "worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::workflow_factory;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct EchoWorkflow;

    #[async_trait::async_trait]
    impl WorkflowRun for EchoWorkflow {
        async fn run(
            &self,
            _ctx: WorkflowContext,
            input: serde_json::Value,
        ) -> Result<serde_json::Value, WorkflowError> {
            Ok(input)
        }
    }

    struct GateWorkflow {
        open: parking_lot::Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl WorkflowRun for GateWorkflow {
        async fn run(
            &self,
            ctx: WorkflowContext,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, WorkflowError> {
            let opened = ctx
                .wait_condition(|| *self.open.lock(), Some(Duration::from_secs(5)))
                .await;
            Ok(json!({ "opened": opened }))
        }

        fn handle_signal(
            &self,
            _ctx: &SignalContext,
            name: &str,
            _payload: serde_json::Value,
        ) -> Result<(), WorkflowError> {
            match name {
                "open" => {
                    *self.open.lock() = true;
                    Ok(())
                }
                other => Err(WorkflowError::new(format!("unknown signal: {other}"))),
            }
        }

        fn handle_query(
            &self,
            name: &str,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, WorkflowError> {
            match name {
                "is_open" => Ok(json!(*self.open.lock())),
                other => Err(WorkflowError::new(format!("unknown query: {other}"))),
            }
        }
    }

    fn start_options(id: &str) -> StartWorkflowOptions {
        StartWorkflowOptions::new("Test:Echo", id, "test-queue", json!({"v": 1}))
    }

    async fn engine_with_registrations() -> InMemoryEngine {
        let engine = InMemoryEngine::new();
        let worker = engine.worker(WorkerOptions::new("test-queue")).unwrap();
        worker.register_workflow("Test:Echo", workflow_factory(|| EchoWorkflow));
        worker.register_workflow(
            "Test:Gate",
            workflow_factory(|| GateWorkflow {
                open: parking_lot::Mutex::new(false),
            }),
        );
        worker.register_activity(
            "echo",
            crate::activity::activity_handler(|_ctx, input| async move { Ok(input) }),
        );
        engine
    }

    #[tokio::test]
    async fn test_start_and_await_result() {
        let engine = engine_with_registrations().await;
        let handle = engine.start_workflow(start_options("wf-1")).await.unwrap();

        assert_eq!(handle.workflow_id, "wf-1");
        let result = engine.workflow_result("wf-1").await.unwrap();
        assert_eq!(result["v"], 1);
    }

    #[tokio::test]
    async fn test_duplicate_running_id_rejected() {
        let engine = engine_with_registrations().await;
        let opts = StartWorkflowOptions::new("Test:Gate", "wf-dup", "test-queue", json!({}));
        engine.start_workflow(opts.clone()).await.unwrap();

        let err = engine.start_workflow(opts).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowAlreadyStarted(_)));
    }

    #[tokio::test]
    async fn test_id_reuse_after_close() {
        let engine = engine_with_registrations().await;
        engine.start_workflow(start_options("wf-reuse")).await.unwrap();
        engine.workflow_result("wf-reuse").await.unwrap();

        // Default policy allows reuse once the previous run closed.
        engine.start_workflow(start_options("wf-reuse")).await.unwrap();
    }

    #[tokio::test]
    async fn test_signal_wakes_wait_condition() {
        let engine = engine_with_registrations().await;
        let opts = StartWorkflowOptions::new("Test:Gate", "wf-gate", "test-queue", json!({}));
        engine.start_workflow(opts).await.unwrap();

        engine
            .signal_workflow("wf-gate", "open", json!({}))
            .await
            .unwrap();

        let result = engine.workflow_result("wf-gate").await.unwrap();
        assert_eq!(result["opened"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_condition_timeout() {
        let engine = engine_with_registrations().await;
        let opts = StartWorkflowOptions::new("Test:Gate", "wf-timeout", "test-queue", json!({}));
        engine.start_workflow(opts).await.unwrap();

        // No signal; virtual time runs the 5 second timeout out instantly.
        let result = engine.workflow_result("wf-timeout").await.unwrap();
        assert_eq!(result["opened"], false);
    }

    #[tokio::test]
    async fn test_query_reads_state() {
        let engine = engine_with_registrations().await;
        let opts = StartWorkflowOptions::new("Test:Gate", "wf-query", "test-queue", json!({}));
        engine.start_workflow(opts).await.unwrap();

        let open = engine
            .query_workflow("wf-query", "is_open", json!({}))
            .await
            .unwrap();
        assert_eq!(open, json!(false));

        let err = engine
            .query_workflow("wf-query", "nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QueryFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_signal_is_swallowed() {
        let engine = engine_with_registrations().await;
        let opts = StartWorkflowOptions::new("Test:Gate", "wf-badsig", "test-queue", json!({}));
        engine.start_workflow(opts).await.unwrap();

        // Handler rejects the name; the sender still gets Ok.
        engine
            .signal_workflow("wf-badsig", "bogus", json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_direct_activity_execution_recorded() {
        let engine = engine_with_registrations().await;
        let out = engine
            .execute_activity("test-queue", "echo", json!({"k": 2}), ActivityOptions::default())
            .await
            .unwrap();

        assert_eq!(out["k"], 2);
        let log = engine.activity_executions();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].activity_type, "echo");
        assert_eq!(log[0].workflow_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_retries_until_success() {
        let engine = InMemoryEngine::new();
        let worker = engine.worker(WorkerOptions::new("retry-queue")).unwrap();
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        worker.register_activity(
            "flaky",
            crate::activity::activity_handler(move |_ctx, _input| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ActivityError::retryable("transient"))
                    } else {
                        Ok(json!("done"))
                    }
                }
            }),
        );

        let out = engine
            .execute_activity("retry-queue", "flaky", json!({}), ActivityOptions::default())
            .await
            .unwrap();
        assert_eq!(out, json!("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_activity_fails_fast() {
        let engine = InMemoryEngine::new();
        let worker = engine.worker(WorkerOptions::new("fatal-queue")).unwrap();
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        worker.register_activity(
            "fatal",
            crate::activity::activity_handler(move |_ctx, _input| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::non_retryable("bad input"))
                }
            }),
        );

        let err = engine
            .execute_activity("fatal-queue", "fatal", json!({}), ActivityOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActivityFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_without_worker_fails() {
        let engine = InMemoryEngine::new();
        let err = engine.start_workflow(start_options("wf-none")).await.unwrap_err();
        assert!(matches!(err, EngineError::NoWorkerForQueue(_)));
    }
}
