//! HITL task state machine
//!
//! Pure state: no I/O, no engine types. The task workflow drives it from
//! signals; the invariants live here so they can be tested directly.
//!
//! Transitions are `Pending → Completed` only and `Completed` is terminal:
//! draft updates and actions are rejected once the task closed, whatever
//! closed it (action or timeout).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input to the task workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkflowRequest {
    /// Unique within tenant + workflow type; generated when empty
    #[serde(default)]
    pub task_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Participant asked to act on the task
    #[serde(default)]
    pub participant_id: String,

    /// Work presented for review; mutable while pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_work: Option<String>,

    /// Allowed action names; empty means any action is accepted
    /// (`approve`/`reject` by convention)
    #[serde(default)]
    pub actions: Vec<String>,

    /// Immutable after creation
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Whole-task timeout; elapsing closes the task as timed out
    #[serde(
        default,
        with = "xians_engine::retry::duration_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Workflow to notify once the task is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_workflow_id: Option<String>,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// Why a signal did not change state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRejection {
    /// The task already closed
    AlreadyCompleted,

    /// The action name is not in the allowed set
    UnknownAction(String),
}

impl std::fmt::Display for TaskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyCompleted => write!(f, "task is already completed"),
            Self::UnknownAction(action) => write!(f, "action not allowed: {action}"),
        }
    }
}

/// Snapshot returned by the `get_task_info` query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub participant_id: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub current_draft: Option<String>,
    pub is_completed: bool,
    pub performed_action: Option<String>,
    pub comment: Option<String>,
    pub actions: Vec<String>,
    pub initial_work: Option<String>,
    pub final_work: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timed_out: bool,
}

/// Result returned when the task workflow closes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkflowResult {
    pub task_id: String,
    pub initial_work: Option<String>,
    pub final_work: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub performed_action: Option<String>,
    pub comment: Option<String>,
    pub timed_out: bool,
    /// `true` when closed by an action, `false` when closed by timeout
    pub completed: bool,
}

/// Durable task state held by the task workflow
#[derive(Debug, Clone)]
pub struct TaskState {
    task_id: String,
    title: String,
    description: String,
    participant_id: String,
    draft_work: Option<String>,
    actions: Vec<String>,
    metadata: serde_json::Map<String, serde_json::Value>,
    status: TaskStatus,
    performed_action: Option<String>,
    comment: Option<String>,
    initial_work: Option<String>,
    final_work: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    timed_out: bool,
}

impl TaskState {
    /// Initialize from the request; `initial_work` snapshots the draft
    pub fn new(request: TaskWorkflowRequest, task_id: String) -> Self {
        let mut actions = request.actions;
        actions.dedup();
        Self {
            task_id,
            title: request.title,
            description: request.description,
            participant_id: request.participant_id,
            initial_work: request.draft_work.clone(),
            draft_work: request.draft_work,
            actions,
            metadata: request.metadata,
            status: TaskStatus::Pending,
            performed_action: None,
            comment: None,
            final_work: None,
            completed_at: None,
            timed_out: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Replace the draft; idempotent for equal text, rejected once closed
    pub fn update_draft(&mut self, text: String) -> Result<(), TaskRejection> {
        if self.is_completed() {
            return Err(TaskRejection::AlreadyCompleted);
        }
        self.draft_work = Some(text);
        Ok(())
    }

    /// Perform an action, closing the task
    pub fn perform_action(
        &mut self,
        action: String,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TaskRejection> {
        if self.is_completed() {
            return Err(TaskRejection::AlreadyCompleted);
        }
        if !self.actions.is_empty() && !self.actions.iter().any(|a| a == &action) {
            return Err(TaskRejection::UnknownAction(action));
        }
        self.performed_action = Some(action);
        self.comment = comment;
        self.final_work = self.draft_work.clone();
        self.completed_at = Some(now);
        self.status = TaskStatus::Completed;
        Ok(())
    }

    /// Close the task as timed out; a no-op when already closed
    pub fn time_out(&mut self, now: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        self.timed_out = true;
        self.final_work = self.draft_work.clone();
        self.completed_at = Some(now);
        self.status = TaskStatus::Completed;
    }

    /// Deterministic snapshot for the `get_task_info` query
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            task_id: self.task_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            participant_id: self.participant_id.clone(),
            metadata: self.metadata.clone(),
            current_draft: self.draft_work.clone(),
            is_completed: self.is_completed(),
            performed_action: self.performed_action.clone(),
            comment: self.comment.clone(),
            actions: self.actions.clone(),
            initial_work: self.initial_work.clone(),
            final_work: self.final_work.clone(),
            completed_at: self.completed_at,
            timed_out: self.timed_out,
        }
    }

    /// Result payload for the workflow return value
    pub fn result(&self) -> TaskWorkflowResult {
        TaskWorkflowResult {
            task_id: self.task_id.clone(),
            initial_work: self.initial_work.clone(),
            final_work: self.final_work.clone(),
            completed_at: self.completed_at,
            performed_action: self.performed_action.clone(),
            comment: self.comment.clone(),
            timed_out: self.timed_out,
            completed: !self.timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TaskWorkflowRequest {
        TaskWorkflowRequest {
            task_id: "t-1".into(),
            title: "Review".into(),
            description: "Review the draft".into(),
            participant_id: "u1".into(),
            draft_work: Some("hello".into()),
            actions: vec!["approve".into(), "reject".into()],
            ..Default::default()
        }
    }

    fn state() -> TaskState {
        TaskState::new(request(), "t-1".into())
    }

    #[test]
    fn test_initial_work_snapshots_draft() {
        let state = state();
        let info = state.info();

        assert!(!info.is_completed);
        assert_eq!(info.initial_work.as_deref(), Some("hello"));
        assert_eq!(info.current_draft.as_deref(), Some("hello"));
        assert_eq!(info.final_work, None);
    }

    #[test]
    fn test_approve_happy_path() {
        let mut state = state();
        state.update_draft("hello world".into()).unwrap();
        let now = Utc::now();
        state
            .perform_action("approve".into(), Some("LGTM".into()), now)
            .unwrap();

        let result = state.result();
        assert_eq!(result.task_id, "t-1");
        assert_eq!(result.initial_work.as_deref(), Some("hello"));
        assert_eq!(result.final_work.as_deref(), Some("hello world"));
        assert_eq!(result.performed_action.as_deref(), Some("approve"));
        assert_eq!(result.comment.as_deref(), Some("LGTM"));
        assert!(!result.timed_out);
        assert!(result.completed);
        assert_eq!(result.completed_at, Some(now));
    }

    #[test]
    fn test_action_whitelist() {
        let mut state = state();
        let err = state
            .perform_action("escalate".into(), None, Utc::now())
            .unwrap_err();

        assert_eq!(err, TaskRejection::UnknownAction("escalate".into()));
        assert!(!state.is_completed());
        assert_eq!(state.info().performed_action, None);
    }

    #[test]
    fn test_empty_actions_accept_anything() {
        let mut state = TaskState::new(
            TaskWorkflowRequest {
                actions: vec![],
                ..request()
            },
            "t-2".into(),
        );
        state
            .perform_action("escalate".into(), None, Utc::now())
            .unwrap();
        assert!(state.is_completed());
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut state = state();
        state
            .perform_action("approve".into(), None, Utc::now())
            .unwrap();

        assert_eq!(
            state.update_draft("late".into()),
            Err(TaskRejection::AlreadyCompleted)
        );
        assert_eq!(
            state.perform_action("reject".into(), None, Utc::now()),
            Err(TaskRejection::AlreadyCompleted)
        );
        // Timeout after completion changes nothing.
        state.time_out(Utc::now());
        assert!(!state.result().timed_out);
        assert_eq!(state.info().performed_action.as_deref(), Some("approve"));
        assert_eq!(state.info().current_draft.as_deref(), Some("hello"));
    }

    #[test]
    fn test_draft_update_idempotence() {
        let mut state = state();
        state.update_draft("v2".into()).unwrap();
        let snapshot = state.info();
        state.update_draft("v2".into()).unwrap();

        assert_eq!(state.info(), snapshot);
    }

    #[test]
    fn test_timeout_result() {
        let mut state = state();
        let now = Utc::now();
        state.time_out(now);

        let result = state.result();
        assert!(result.timed_out);
        assert!(!result.completed);
        assert_eq!(result.performed_action, None);
        assert_eq!(result.completed_at, Some(now));
        assert_eq!(result.final_work.as_deref(), Some("hello"));
    }

    #[test]
    fn test_request_serde_defaults() {
        let request: TaskWorkflowRequest = serde_json::from_value(serde_json::json!({
            "title": "Review",
            "participantId": "u1"
        }))
        .unwrap();

        assert_eq!(request.task_id, "");
        assert!(request.actions.is_empty());
        assert_eq!(request.timeout, None);
    }
}
