//! Start options, memo and workflow handles

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::{duration_millis_opt, RetryPolicy};

/// Keys propagated with every workflow start so downstream validators can
/// read tenancy without reparsing workflow ids.
///
/// The memo rides along on child workflows and scheduled starts unchanged
/// unless explicitly overridden.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Memo {
    /// Tenant that owns the execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Whether the owning agent processes executions from any tenant
    #[serde(default)]
    pub system_scoped: bool,

    /// Free-form caller annotations
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Memo {
    /// Memo for a tenant-owned execution
    pub fn for_tenant(tenant_id: impl Into<String>, system_scoped: bool) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            system_scoped,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a free-form annotation
    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Policy applied when a workflow id collides with a previous execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdReusePolicy {
    /// Allow reuse once the previous execution has closed
    #[default]
    AllowIfClosed,

    /// Always allow, replacing closed executions
    Allow,

    /// Reject any reuse, even of closed executions
    Reject,
}

/// What happens to a child workflow when its parent closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParentClosePolicy {
    /// Child keeps running independently
    #[default]
    Abandon,

    /// Child is terminated with the parent
    Terminate,

    /// Child is asked to cancel
    RequestCancel,
}

/// Options for starting a top-level workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowOptions {
    /// Workflow type, e.g. `MyAgent:Chat`
    pub workflow_type: String,

    /// Full workflow id, e.g. `acme:MyAgent:Chat:run-123`
    pub workflow_id: String,

    /// Task queue the execution is dispatched to
    pub task_queue: String,

    /// Workflow input payload
    #[serde(default)]
    pub input: serde_json::Value,

    /// Tenancy memo
    #[serde(default)]
    pub memo: Memo,

    /// Id collision policy
    #[serde(default)]
    pub id_reuse_policy: IdReusePolicy,

    /// Retry policy for the whole execution (engine-level)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    /// Whole-execution timeout
    #[serde(default, with = "duration_millis_opt")]
    pub execution_timeout: Option<Duration>,
}

impl StartWorkflowOptions {
    pub fn new(
        workflow_type: impl Into<String>,
        workflow_id: impl Into<String>,
        task_queue: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            workflow_id: workflow_id.into(),
            task_queue: task_queue.into(),
            input,
            memo: Memo::default(),
            id_reuse_policy: IdReusePolicy::default(),
            retry_policy: None,
            execution_timeout: None,
        }
    }

    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_id_reuse_policy(mut self, policy: IdReusePolicy) -> Self {
        self.id_reuse_policy = policy;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Options for starting a child workflow from workflow code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildWorkflowOptions {
    /// Workflow type of the child
    pub workflow_type: String,

    /// Full workflow id of the child
    pub workflow_id: String,

    /// Task queue; defaults to the parent's queue when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_queue: Option<String>,

    /// Child input payload
    #[serde(default)]
    pub input: serde_json::Value,

    /// Memo; inherits the parent memo when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<Memo>,

    /// Lifecycle binding to the parent
    #[serde(default)]
    pub parent_close: ParentClosePolicy,

    /// Whole-execution timeout for the child
    #[serde(default, with = "duration_millis_opt")]
    pub execution_timeout: Option<Duration>,
}

impl ChildWorkflowOptions {
    pub fn new(
        workflow_type: impl Into<String>,
        workflow_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            workflow_id: workflow_id.into(),
            task_queue: None,
            input,
            memo: None,
            parent_close: ParentClosePolicy::default(),
            execution_timeout: None,
        }
    }

    pub fn with_task_queue(mut self, queue: impl Into<String>) -> Self {
        self.task_queue = Some(queue.into());
        self
    }

    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn with_parent_close(mut self, policy: ParentClosePolicy) -> Self {
        self.parent_close = policy;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}

/// Handle to a started workflow execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub run_id: Uuid,
}

/// Execution status as reported by `describe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Description of a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub workflow_type: String,
    pub task_queue: String,
    pub status: WorkflowExecutionStatus,
    pub memo: Memo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_serialization_skips_empty_fields() {
        let memo = Memo::for_tenant("acme", false);
        let json = serde_json::to_value(&memo).unwrap();

        assert_eq!(json["tenant_id"], "acme");
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_memo_extra_entries() {
        let memo = Memo::for_tenant("acme", true).with_entry("origin", "schedule".into());

        assert!(memo.system_scoped);
        assert_eq!(memo.extra["origin"], "schedule");
    }

    #[test]
    fn test_start_options_round_trip() {
        let opts = StartWorkflowOptions::new(
            "MyAgent:Chat",
            "acme:MyAgent:Chat:run-1",
            "acme:MyAgent:Chat",
            serde_json::json!({"text": "hi"}),
        )
        .with_memo(Memo::for_tenant("acme", false))
        .with_execution_timeout(Duration::from_secs(60));

        let json = serde_json::to_string(&opts).unwrap();
        let parsed: StartWorkflowOptions = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.workflow_id, "acme:MyAgent:Chat:run-1");
        assert_eq!(parsed.memo.tenant_id.as_deref(), Some("acme"));
        assert_eq!(parsed.execution_timeout, Some(Duration::from_secs(60)));
    }
}
