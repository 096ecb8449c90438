//! Runtime error taxonomy

use xians_engine::EngineError;

use crate::http::HttpError;

/// Errors surfaced by the runtime's public API
#[derive(Debug, thiserror::Error)]
pub enum XiansError {
    /// Missing or malformed options; raised at platform init, never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tenant-scoped API was used outside workflow/activity context
    #[error("no ambient workflow or activity context")]
    NoAmbientContext,

    /// Workflow id parsing or validation failure
    #[error("invalid workflow id: {0}")]
    InvalidWorkflowId(String),

    /// A non-system-scoped agent touched a foreign tenant's execution
    #[error("tenant isolation violation: execution tenant {execution_tenant} does not match agent tenant {agent_tenant}")]
    TenantIsolationViolation {
        execution_tenant: String,
        agent_tenant: String,
    },

    /// HTTP transport or status failure
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A schedule with the rewritten id already exists
    #[error("schedule already exists: {0}")]
    ScheduleAlreadyExists(String),

    /// No schedule with the rewritten id
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// The schedule spec is malformed
    #[error("invalid schedule spec: {0}")]
    InvalidScheduleSpec(String),

    /// The schedule spec cannot be created from workflow code
    #[error("schedule spec not supported inside workflows: {0}")]
    UnsupportedInWorkflow(String),

    /// An activity invocation failed after retries
    #[error("activity failed: {0}")]
    Activity(String),

    /// Any other engine failure
    #[error("engine error: {0}")]
    Engine(EngineError),

    /// Payload (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<EngineError> for XiansError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ScheduleAlreadyExists(id) => Self::ScheduleAlreadyExists(id),
            EngineError::ScheduleNotFound(id) => Self::ScheduleNotFound(id),
            EngineError::InvalidScheduleSpec(msg) => Self::InvalidScheduleSpec(msg),
            EngineError::ActivityFailed { message, .. } => Self::Activity(message),
            other => Self::Engine(other),
        }
    }
}

/// Convenience alias used across the runtime
pub type Result<T> = std::result::Result<T, XiansError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_errors_map_from_engine() {
        let err: XiansError = EngineError::ScheduleAlreadyExists("acme:daily".into()).into();
        assert!(matches!(err, XiansError::ScheduleAlreadyExists(id) if id == "acme:daily"));

        let err: XiansError = EngineError::ScheduleNotFound("acme:x".into()).into();
        assert!(matches!(err, XiansError::ScheduleNotFound(_)));
    }

    #[test]
    fn test_isolation_error_names_both_tenants() {
        let err = XiansError::TenantIsolationViolation {
            execution_tenant: "contoso".into(),
            agent_tenant: "acme".into(),
        };
        let message = err.to_string();
        assert!(message.contains("contoso"));
        assert!(message.contains("acme"));
    }
}
