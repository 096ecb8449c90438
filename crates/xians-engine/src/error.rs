//! Engine error types

use crate::workflow::WorkflowError;

/// Errors surfaced by engine client and worker operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow execution with the given id
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A workflow with the given id is already running (or id reuse is rejected)
    #[error("workflow already started: {0}")]
    WorkflowAlreadyStarted(String),

    /// No factory registered for the workflow type on the target task queue
    #[error("unknown workflow type {workflow_type} on task queue {task_queue}")]
    UnknownWorkflowType {
        workflow_type: String,
        task_queue: String,
    },

    /// No worker has registered for the task queue
    #[error("no worker registered for task queue: {0}")]
    NoWorkerForQueue(String),

    /// No activity handler registered under the given type
    #[error("unknown activity type {activity_type} on task queue {task_queue}")]
    UnknownActivity {
        activity_type: String,
        task_queue: String,
    },

    /// Activity failed after exhausting its retry policy
    #[error("activity {activity_type} failed: {message}")]
    ActivityFailed {
        activity_type: String,
        message: String,
    },

    /// The query handler failed or is not registered
    #[error("query {name} failed: {message}")]
    QueryFailed { name: String, message: String },

    /// An update validator rejected the request before durable processing
    #[error("update {name} rejected: {reason}")]
    UpdateRejected { name: String, reason: String },

    /// The update handler failed or is not registered
    #[error("update {name} failed: {message}")]
    UpdateFailed { name: String, message: String },

    /// The workflow completed with a failure
    #[error("workflow failed: {0}")]
    WorkflowFailed(WorkflowError),

    /// The workflow was cancelled before producing a result
    #[error("workflow cancelled: {0}")]
    WorkflowCancelled(String),

    /// A schedule with the given id already exists
    #[error("schedule already exists: {0}")]
    ScheduleAlreadyExists(String),

    /// No schedule with the given id
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// The schedule spec is malformed (bad cron expression, zero interval, ...)
    #[error("invalid schedule spec: {0}")]
    InvalidScheduleSpec(String),

    /// Payload (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine or worker is shutting down
    #[error("engine is shutting down")]
    Shutdown,
}
