//! Workflow trait definition
//!
//! A workflow is a deterministic coordinator: an async `run` body that may
//! suspend only on engine-provided awaits, plus synchronous signal, query and
//! update handlers on the same instance. The engine serializes handler
//! delivery per workflow and wakes `wait_condition` after every mutation.
//!
//! # Determinism
//!
//! Workflow code must not read the wall clock, spawn OS threads, or perform
//! I/O directly. `WorkflowContext` provides `now()`, `new_guid()`, `random()`
//! and activity execution; everything else belongs in activities.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::WorkflowContext;

/// Error type for workflow failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// Deterministic inputs available to signal and update handlers
///
/// Handlers run outside the `run` body, so they get their own slice of
/// engine-provided time.
#[derive(Debug, Clone)]
pub struct SignalContext {
    /// Workflow id the signal was delivered to
    pub workflow_id: String,

    /// Engine time at delivery
    pub now: DateTime<Utc>,
}

/// A durable workflow instance
///
/// Implementations hold their mutable state behind interior mutability
/// (`parking_lot::Mutex` or similar); the engine guarantees signals and
/// updates are delivered one at a time per workflow, in history order.
///
/// # Example
///
/// ```ignore
/// struct Counter {
///     count: Mutex<u64>,
/// }
///
/// #[async_trait]
/// impl WorkflowRun for Counter {
///     async fn run(&self, ctx: WorkflowContext, _input: Value) -> Result<Value, WorkflowError> {
///         ctx.wait_condition(|| *self.count.lock() >= 3, None).await;
///         Ok(json!({ "count": *self.count.lock() }))
///     }
///
///     fn handle_signal(&self, _ctx: &SignalContext, name: &str, _payload: Value) -> Result<(), WorkflowError> {
///         match name {
///             "increment" => {
///                 *self.count.lock() += 1;
///                 Ok(())
///             }
///             other => Err(WorkflowError::new(format!("unknown signal: {other}"))),
///         }
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait WorkflowRun: Send + Sync + 'static {
    /// The workflow body, executed once per run
    async fn run(
        &self,
        ctx: WorkflowContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError>;

    /// Handle an external signal (fire-and-forget; errors are logged, never
    /// returned to the sender)
    fn handle_signal(
        &self,
        ctx: &SignalContext,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        let _ = (ctx, payload);
        Err(WorkflowError::new(format!("unknown signal: {name}")))
    }

    /// Handle a read-only query against current state
    fn handle_query(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let _ = args;
        Err(WorkflowError::new(format!("unknown query: {name}")))
    }

    /// Validate an update before it is durably processed
    fn validate_update(&self, name: &str, args: &serde_json::Value) -> Result<(), WorkflowError> {
        let _ = (name, args);
        Ok(())
    }

    /// Handle an update: mutate state and return the response payload
    fn handle_update(
        &self,
        ctx: &SignalContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let _ = (ctx, args);
        Err(WorkflowError::new(format!("unknown update: {name}")))
    }
}

/// Factory creating a fresh workflow instance per started execution
pub type WorkflowFactory = Arc<dyn Fn() -> Arc<dyn WorkflowRun> + Send + Sync>;

/// Wrap a plain closure into a [`WorkflowFactory`]
pub fn workflow_factory<F, W>(f: F) -> WorkflowFactory
where
    F: Fn() -> W + Send + Sync + 'static,
    W: WorkflowRun,
{
    Arc::new(move || Arc::new(f()) as Arc<dyn WorkflowRun>)
}

/// Deterministic UUID source
///
/// The in-memory engine derives these from entropy recorded at generation
/// time; a replaying engine would substitute history values.
pub(crate) fn generate_guid() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let error = WorkflowError::new("something went wrong");
        assert_eq!(error.to_string(), "something went wrong");
    }

    #[test]
    fn test_workflow_error_with_code() {
        let error = WorkflowError::new("not found").with_code("NOT_FOUND");
        assert_eq!(error.code, Some("NOT_FOUND".to_string()));
    }
}
