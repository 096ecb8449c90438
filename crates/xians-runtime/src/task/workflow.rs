//! The HITL task workflow
//!
//! A durable coordinator over [`TaskState`](super::state::TaskState): it
//! initializes state from the request, notifies the creator, then waits for
//! completion or timeout. Signals mutate the state under the engine's
//! per-workflow delivery lock; the query reads a snapshot.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use xians_engine::{SignalContext, WorkflowContext, WorkflowError, WorkflowRun};

use crate::messaging::MessagingService;

use super::state::{TaskState, TaskWorkflowRequest};

/// Signal and query names of the task workflow
pub mod names {
    pub const UPDATE_DRAFT: &str = "update_draft";
    pub const PERFORM_ACTION: &str = "perform_action";
    /// Legacy alias for `perform_action` with `action = "approve"`
    pub const APPROVE: &str = "approve";
    /// Legacy alias for `perform_action` with `action = "reject"`
    pub const REJECT: &str = "reject";
    pub const GET_TASK_INFO: &str = "get_task_info";
}

/// Payload of the `update_draft` signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDraftRequest {
    pub text: String,
}

/// Payload of the `perform_action` signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformActionRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Payload of the legacy `approve`/`reject` signals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The task workflow instance
pub struct TaskWorkflow {
    messaging: Arc<MessagingService>,
    state: Mutex<Option<TaskState>>,
}

impl TaskWorkflow {
    pub fn new(messaging: Arc<MessagingService>) -> Self {
        Self {
            messaging,
            state: Mutex::new(None),
        }
    }

    fn perform(
        &self,
        ctx: &SignalContext,
        action: String,
        comment: Option<String>,
    ) -> Result<(), WorkflowError> {
        let mut state = self.state.lock();
        let state = state
            .as_mut()
            .ok_or_else(|| WorkflowError::new("task state not initialized"))?;
        state
            .perform_action(action, comment, ctx.now)
            .map_err(|e| WorkflowError::new(e.to_string()))
    }
}

#[async_trait::async_trait]
impl WorkflowRun for TaskWorkflow {
    async fn run(
        &self,
        ctx: WorkflowContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let request: TaskWorkflowRequest = serde_json::from_value(input)
            .map_err(|e| WorkflowError::new(format!("invalid task request: {e}")))?;

        let task_id = if request.task_id.is_empty() {
            ctx.new_guid().to_string()
        } else {
            request.task_id.clone()
        };
        let timeout = request.timeout;
        let creator = request.creator_workflow_id.clone();
        let participant_id = request.participant_id.clone();
        *self.state.lock() = Some(TaskState::new(request, task_id.clone()));

        // Tell the creator the task is ready. Routed through the executor,
        // so this runs as an activity; failure must not fail the task.
        if creator.is_some() {
            let notice = serde_json::json!({
                "name": "task_ready",
                "taskId": task_id,
                "taskWorkflowId": ctx.workflow_id(),
                "creatorWorkflowId": creator,
            });
            if let Err(e) = self
                .messaging
                .send_data(participant_id, notice, None)
                .await
            {
                warn!(
                    workflow_id = %ctx.workflow_id(),
                    error = %e,
                    "task ready notification failed"
                );
            }
        }

        let completed = ctx
            .wait_condition(
                || {
                    self.state
                        .lock()
                        .as_ref()
                        .map(|s| s.is_completed())
                        .unwrap_or(false)
                },
                timeout,
            )
            .await;

        let mut state = self.state.lock();
        let state = state
            .as_mut()
            .expect("task state initialized at run start");
        if !completed {
            state.time_out(ctx.now());
        }

        serde_json::to_value(state.result())
            .map_err(|e| WorkflowError::new(format!("result serialization failed: {e}")))
    }

    fn handle_signal(
        &self,
        ctx: &SignalContext,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        match name {
            names::UPDATE_DRAFT => {
                let request: UpdateDraftRequest = serde_json::from_value(payload)
                    .map_err(|e| WorkflowError::new(format!("invalid draft update: {e}")))?;
                let mut state = self.state.lock();
                let state = state
                    .as_mut()
                    .ok_or_else(|| WorkflowError::new("task state not initialized"))?;
                state
                    .update_draft(request.text)
                    .map_err(|e| WorkflowError::new(e.to_string()))
            }
            names::PERFORM_ACTION => {
                let request: PerformActionRequest = serde_json::from_value(payload)
                    .map_err(|e| WorkflowError::new(format!("invalid action request: {e}")))?;
                self.perform(ctx, request.action, request.comment)
            }
            names::APPROVE | names::REJECT => {
                let request: LegacyActionRequest =
                    serde_json::from_value(payload).unwrap_or_default();
                self.perform(ctx, name.to_string(), request.comment)
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
            names::GET_TASK_INFO => {
                let state = self.state.lock();
                let state = state
                    .as_ref()
                    .ok_or_else(|| WorkflowError::new("task state not initialized"))?;
                serde_json::to_value(state.info())
                    .map_err(|e| WorkflowError::new(e.to_string()))
            }
            other => Err(WorkflowError::new(format!("unknown query: {other}"))),
        }
    }
}
