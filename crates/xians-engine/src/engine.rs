//! Engine client and worker trait surface
//!
//! The runtime consumes a durable workflow engine exclusively through these
//! traits. The in-memory engine in [`crate::memory`] implements them for
//! tests and local mode; a production deployment binds them to a real
//! Temporal-style cluster.

use std::sync::Arc;

use tokio::sync::watch;

use crate::activity::{ActivityHandler, ActivityOptions};
use crate::error::EngineError;
use crate::options::{
    StartWorkflowOptions, WorkflowDescription, WorkflowHandle,
};
use crate::schedule::{
    BackfillRequest, ScheduleDescription, ScheduleOptions, ScheduleSummary,
};
use crate::workflow::WorkflowFactory;

/// Client surface of the durable engine
#[async_trait::async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    /// Start a top-level workflow
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Send a fire-and-forget signal to a running workflow
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Run a read-only query against a workflow's current state
    async fn query_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError>;

    /// Run a validated, synchronous update against a workflow
    async fn update_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError>;

    /// Describe a workflow execution
    async fn describe_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowDescription, EngineError>;

    /// Await a workflow's result
    async fn workflow_result(&self, workflow_id: &str) -> Result<serde_json::Value, EngineError>;

    /// Request cancellation of a running workflow
    async fn cancel_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), EngineError>;

    /// Execute a registered activity directly on a task queue, outside any
    /// workflow (used for isolated handler invocation)
    async fn execute_activity(
        &self,
        task_queue: &str,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, EngineError>;

    /// Create a schedule; fails with [`EngineError::ScheduleAlreadyExists`]
    /// on id collision
    async fn create_schedule(&self, options: ScheduleOptions) -> Result<(), EngineError>;

    /// Describe a schedule
    async fn describe_schedule(
        &self,
        schedule_id: &str,
    ) -> Result<ScheduleDescription, EngineError>;

    /// Pause a schedule with an optional operator note
    async fn pause_schedule(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), EngineError>;

    /// Resume a paused schedule
    async fn unpause_schedule(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), EngineError>;

    /// Fire a schedule immediately, regardless of its cadence
    async fn trigger_schedule(&self, schedule_id: &str) -> Result<(), EngineError>;

    /// Delete a schedule
    async fn delete_schedule(&self, schedule_id: &str) -> Result<(), EngineError>;

    /// List schedules, optionally filtered to ids starting with `prefix`
    async fn list_schedules(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<ScheduleSummary>, EngineError>;

    /// Start actions for past fire times of a schedule
    async fn backfill_schedule(
        &self,
        schedule_id: &str,
        request: BackfillRequest,
    ) -> Result<(), EngineError>;

    /// Create a worker bound to a task queue
    fn worker(&self, options: WorkerOptions) -> Result<Arc<dyn EngineWorker>, EngineError>;
}

/// Options for creating a worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Task queue this worker polls
    pub task_queue: String,

    /// Identity reported in engine diagnostics
    pub identity: String,

    /// Maximum concurrent activity executions
    pub max_concurrent_activities: usize,
}

impl WorkerOptions {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            identity: format!("worker-{}", uuid::Uuid::now_v7()),
            max_concurrent_activities: 10,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max.max(1);
        self
    }
}

/// Worker surface: registration plus a run loop
///
/// Registration must complete before `run` is called; registries are
/// immutable once the worker is polling.
#[async_trait::async_trait]
pub trait EngineWorker: Send + Sync {
    /// Register a workflow type with a factory creating fresh instances
    fn register_workflow(&self, workflow_type: &str, factory: WorkflowFactory);

    /// Register an activity handler
    fn register_activity(&self, activity_type: &str, handler: ActivityHandler);

    /// Poll until the shutdown watch flips to `true`
    ///
    /// In-flight workflow executions are not terminated by shutdown; they
    /// continue until completion or timeout.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), EngineError>;
}
