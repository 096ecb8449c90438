//! Workflow identifier parsing and task queue derivation
//!
//! Workflow ids follow the grammar `tenant ":" workflowType (":" suffix)*`,
//! where `workflowType` itself contains a single `:` between agent and name
//! (`MyAgent:Chat`), so a full id reads `acme:MyAgent:Chat:run-123`. This
//! module is the single source of truth for parsing, formatting and queue
//! naming; nothing else in the runtime splits ids by hand.

use tracing::warn;

use crate::error::XiansError;

/// A validated workflow id, split into its leading components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWorkflowId {
    /// First component
    pub tenant: String,

    /// Agent-qualified workflow type, e.g. `MyAgent:Chat`
    pub workflow_type: String,

    /// The full id as given
    pub full: String,
}

/// Extract the tenant (first component) from a workflow id
pub fn extract_tenant(workflow_id: &str) -> Result<&str, XiansError> {
    let mut parts = workflow_id.splitn(3, ':');
    let tenant = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid(workflow_id))?;
    if parts.next().filter(|t| !t.is_empty()).is_none() {
        return Err(invalid(workflow_id));
    }
    Ok(tenant)
}

/// Extract the workflow type from a workflow id
///
/// Workflow types conventionally carry a single `:` between agent and name,
/// so the type spans the second and third components when both are present
/// (`acme:MyAgent:Chat:run-1` → `MyAgent:Chat`).
pub fn extract_workflow_type(workflow_id: &str) -> Result<String, XiansError> {
    extract_tenant(workflow_id)?;
    let mut parts = workflow_id.split(':').skip(1);
    let agent = parts.next().expect("validated above");
    Ok(match parts.next() {
        Some(name) if !name.is_empty() => format!("{agent}:{name}"),
        _ => agent.to_string(),
    })
}

/// Parse and validate a workflow id
pub fn parse(workflow_id: &str) -> Result<ParsedWorkflowId, XiansError> {
    let tenant = extract_tenant(workflow_id)?.to_string();
    let workflow_type = extract_workflow_type(workflow_id)?;
    Ok(ParsedWorkflowId {
        tenant,
        workflow_type,
        full: workflow_id.to_string(),
    })
}

/// Build a workflow id from its components; an empty suffix is omitted
pub fn build(tenant: &str, workflow_type: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) if !s.is_empty() => format!("{tenant}:{workflow_type}:{s}"),
        _ => format!("{tenant}:{workflow_type}"),
    }
}

/// Derive the task queue name for a workflow type
///
/// System-scoped agents share one queue per workflow type; tenant-scoped
/// agents get a tenant-prefixed queue. This rule is the only source of
/// queue names.
pub fn task_queue(
    workflow_type: &str,
    system_scoped: bool,
    tenant: Option<&str>,
) -> Result<String, XiansError> {
    if system_scoped {
        return Ok(workflow_type.to_string());
    }
    match tenant.filter(|t| !t.is_empty()) {
        Some(tenant) => Ok(format!("{tenant}:{workflow_type}")),
        None => Err(XiansError::Configuration(format!(
            "tenant is required for the task queue of non-system-scoped workflow type {workflow_type}"
        ))),
    }
}

/// Check whether an execution's tenant may be processed by an agent
///
/// System-scoped agents accept any tenant. Otherwise the tenants must match;
/// a mismatch logs a structured warning and returns `false`.
pub fn validate_isolation(id_tenant: &str, expected_tenant: Option<&str>, system_scoped: bool) -> bool {
    if system_scoped {
        return true;
    }
    let matches = expected_tenant == Some(id_tenant);
    if !matches {
        warn!(
            execution_tenant = id_tenant,
            agent_tenant = expected_tenant.unwrap_or("<none>"),
            "tenant isolation check failed"
        );
    }
    matches
}

fn invalid(workflow_id: &str) -> XiansError {
    XiansError::InvalidWorkflowId(format!(
        "expected tenant:workflowType[:suffix], got {workflow_id:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tenant() {
        assert_eq!(extract_tenant("acme:MyAgent:Chat:run-1").unwrap(), "acme");
        assert_eq!(extract_tenant("acme:MyAgent").unwrap(), "acme");
    }

    #[test]
    fn test_extract_tenant_rejects_malformed_ids() {
        assert!(extract_tenant("acme").is_err());
        assert!(extract_tenant(":MyAgent:Chat").is_err());
        assert!(extract_tenant("acme:").is_err());
        assert!(extract_tenant("").is_err());
    }

    #[test]
    fn test_extract_workflow_type() {
        assert_eq!(
            extract_workflow_type("acme:MyAgent:Chat").unwrap(),
            "MyAgent:Chat"
        );
        assert_eq!(
            extract_workflow_type("acme:MyAgent:Chat:run-1").unwrap(),
            "MyAgent:Chat"
        );
    }

    #[test]
    fn test_round_trip() {
        for (tenant, ty, suffix) in [
            ("acme", "MyAgent:Chat", Some("run-123")),
            ("contoso", "GlobalNotifier:Alerts", None),
            ("t1", "A:B", Some("x:y")),
        ] {
            let id = build(tenant, ty, suffix);
            let parsed = parse(&id).unwrap();
            assert_eq!(parsed.tenant, tenant);
            assert_eq!(parsed.workflow_type, ty);
            assert_eq!(parsed.full, id);
        }
    }

    #[test]
    fn test_build_omits_empty_suffix() {
        assert_eq!(build("acme", "MyAgent:Chat", Some("")), "acme:MyAgent:Chat");
        assert_eq!(build("acme", "MyAgent:Chat", None), "acme:MyAgent:Chat");
    }

    #[test]
    fn test_task_queue_system_scoped() {
        assert_eq!(
            task_queue("MyAgent:Chat", true, None).unwrap(),
            "MyAgent:Chat"
        );
        // Tenant is ignored when system-scoped.
        assert_eq!(
            task_queue("MyAgent:Chat", true, Some("acme")).unwrap(),
            "MyAgent:Chat"
        );
    }

    #[test]
    fn test_task_queue_tenant_scoped() {
        assert_eq!(
            task_queue("MyAgent:Chat", false, Some("acme")).unwrap(),
            "acme:MyAgent:Chat"
        );
    }

    #[test]
    fn test_task_queue_missing_tenant_is_configuration_error() {
        let err = task_queue("MyAgent:Chat", false, None).unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));

        let err = task_queue("MyAgent:Chat", false, Some("")).unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }

    #[test]
    fn test_validate_isolation() {
        assert!(validate_isolation("contoso", Some("acme"), true));
        assert!(validate_isolation("acme", Some("acme"), false));
        assert!(!validate_isolation("contoso", Some("acme"), false));
        assert!(!validate_isolation("contoso", None, false));
    }
}
