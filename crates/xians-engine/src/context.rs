//! Workflow execution context
//!
//! `WorkflowContext` is the only surface workflow code may use for time,
//! randomness, identifiers, timers and outbound work. Everything here is
//! engine-provided so a replaying engine can substitute recorded values.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::{ActivityError, ActivityOptions};
use crate::error::EngineError;
use crate::options::{ChildWorkflowOptions, Memo, WorkflowHandle};

/// Immutable facts about the running workflow
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub workflow_type: String,
    pub task_queue: String,
    pub memo: Memo,
}

/// Engine-side implementation of the workflow context
///
/// Implemented by each engine (the in-memory engine here; a Temporal binding
/// elsewhere). Workflow code never sees this trait directly.
#[async_trait::async_trait]
pub trait WorkflowApi: Send + Sync {
    fn info(&self) -> &WorkflowInfo;

    /// Engine time (history-recorded under replay)
    fn now(&self) -> DateTime<Utc>;

    /// Deterministic UUID
    fn new_guid(&self) -> Uuid;

    /// Deterministic uniform random in `[0, 1)`
    fn random(&self) -> f64;

    /// Durable timer
    async fn sleep(&self, duration: Duration);

    /// Execute an activity on this workflow's task queue and await its result
    async fn execute_activity(
        &self,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, ActivityError>;

    /// Block until the predicate holds or the timeout elapses
    ///
    /// Returns `true` when the condition was met, `false` on timeout. The
    /// predicate is re-evaluated after every signal/update delivery.
    async fn wait_condition(
        &self,
        predicate: &(dyn Fn() -> bool + Send + Sync),
        timeout: Option<Duration>,
    ) -> bool;

    /// Start a child workflow
    async fn start_child_workflow(
        &self,
        options: ChildWorkflowOptions,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Signal another workflow by id
    async fn signal_external(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Whether cancellation has been requested for this run
    fn is_cancelled(&self) -> bool;
}

/// Handle passed to every workflow `run` body
///
/// Cheap to clone; all methods delegate to the owning engine. Parallel
/// composition inside workflow code uses `futures::future::join_all` /
/// `select_all` over futures obtained from this handle; those are the only
/// legal joins.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<dyn WorkflowApi>,
}

impl WorkflowContext {
    pub fn new(inner: Arc<dyn WorkflowApi>) -> Self {
        Self { inner }
    }

    pub fn info(&self) -> &WorkflowInfo {
        self.inner.info()
    }

    pub fn workflow_id(&self) -> &str {
        &self.inner.info().workflow_id
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.info().run_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.inner.info().workflow_type
    }

    pub fn task_queue(&self) -> &str {
        &self.inner.info().task_queue
    }

    pub fn memo(&self) -> &Memo {
        &self.inner.info().memo
    }

    /// Engine time; never read the wall clock in workflow code
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    /// Deterministic UUID
    pub fn new_guid(&self) -> Uuid {
        self.inner.new_guid()
    }

    /// Deterministic uniform random in `[0, 1)`
    pub fn random(&self) -> f64 {
        self.inner.random()
    }

    /// Durable timer
    pub async fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration).await
    }

    /// Execute an activity on this workflow's task queue and await its result
    pub async fn execute_activity(
        &self,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, ActivityError> {
        self.inner.execute_activity(activity_type, input, options).await
    }

    /// Block until `predicate` holds or `timeout` elapses
    ///
    /// Returns `true` when the condition was met, `false` on timeout.
    pub async fn wait_condition<P>(&self, predicate: P, timeout: Option<Duration>) -> bool
    where
        P: Fn() -> bool + Send + Sync,
    {
        self.inner.wait_condition(&predicate, timeout).await
    }

    /// Start a child workflow
    pub async fn start_child_workflow(
        &self,
        options: ChildWorkflowOptions,
    ) -> Result<WorkflowHandle, EngineError> {
        self.inner.start_child_workflow(options).await
    }

    /// Signal another workflow by id
    pub async fn signal_external(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.inner.signal_external(workflow_id, name, payload).await
    }

    /// Whether cancellation has been requested for this run
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_id", &self.inner.info().workflow_id)
            .field("workflow_type", &self.inner.info().workflow_type)
            .finish()
    }
}
