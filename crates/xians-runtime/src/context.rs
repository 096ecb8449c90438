//! Ambient execution context
//!
//! The worker wrappers install a [`RuntimeContext`] into a task-local slot
//! for the duration of every workflow run and activity attempt. Capability
//! services read tenant, agent and workflow facts from here instead of
//! threading them through call sites. Outside workflow/activity execution
//! the accessors fail with `NoAmbientContext`.

use std::sync::Arc;

use xians_engine::WorkflowContext;

use crate::agent::{Agent, AgentRegistry, XiansWorkflow};
use crate::error::XiansError;

/// Where the current code is executing
#[derive(Clone)]
pub enum ContextKind {
    /// Inside a workflow run body; carries the live engine context used by
    /// the context-aware executor
    Workflow(WorkflowContext),

    /// Inside an activity attempt
    Activity,
}

/// The ambient context value installed per invocation
#[derive(Clone)]
pub struct RuntimeContext {
    pub kind: ContextKind,
    pub tenant_id: Option<String>,
    pub agent_name: String,
    pub workflow_type: String,
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub(crate) registry: Arc<AgentRegistry>,
}

impl RuntimeContext {
    pub fn is_in_workflow(&self) -> bool {
        matches!(self.kind, ContextKind::Workflow(_))
    }

    pub fn is_in_activity(&self) -> bool {
        matches!(self.kind, ContextKind::Activity)
    }
}

tokio::task_local! {
    static CURRENT: RuntimeContext;
}

/// Static accessors over the ambient slot
pub struct Context;

impl Context {
    /// Run `fut` with `ctx` installed as the ambient context
    pub async fn scope<F>(ctx: RuntimeContext, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT.scope(ctx, fut).await
    }

    /// The ambient context, failing outside workflow/activity execution
    pub fn current() -> Result<RuntimeContext, XiansError> {
        CURRENT
            .try_with(|c| c.clone())
            .map_err(|_| XiansError::NoAmbientContext)
    }

    /// Whether any ambient context is installed
    pub fn is_available() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    pub fn is_in_workflow() -> bool {
        CURRENT.try_with(|c| c.is_in_workflow()).unwrap_or(false)
    }

    pub fn is_in_activity() -> bool {
        CURRENT.try_with(|c| c.is_in_activity()).unwrap_or(false)
    }

    /// The live workflow context when inside a workflow run body
    pub fn workflow() -> Option<WorkflowContext> {
        CURRENT
            .try_with(|c| match &c.kind {
                ContextKind::Workflow(wf) => Some(wf.clone()),
                ContextKind::Activity => None,
            })
            .unwrap_or(None)
    }

    /// Tenant of the current execution
    pub fn tenant_id() -> Result<String, XiansError> {
        Self::current()?
            .tenant_id
            .ok_or_else(|| XiansError::Configuration("execution has no tenant".into()))
    }

    pub fn agent_name() -> Result<String, XiansError> {
        Ok(Self::current()?.agent_name)
    }

    pub fn workflow_type() -> Result<String, XiansError> {
        Ok(Self::current()?.workflow_type)
    }

    pub fn workflow_id() -> Result<String, XiansError> {
        Ok(Self::current()?.workflow_id)
    }

    pub fn run_id() -> Result<Option<String>, XiansError> {
        Ok(Self::current()?.run_id)
    }

    /// The registered workflow descriptor matching the current workflow type
    pub fn current_workflow() -> Result<Arc<XiansWorkflow>, XiansError> {
        let ctx = Self::current()?;
        ctx.registry
            .find_workflow(&ctx.workflow_type)
            .map(|(_, workflow)| workflow)
            .ok_or_else(|| {
                XiansError::Configuration(format!(
                    "no registered workflow for type {}",
                    ctx.workflow_type
                ))
            })
    }

    /// The agent owning the current execution
    pub fn current_agent() -> Result<Arc<Agent>, XiansError> {
        let ctx = Self::current()?;
        ctx.registry.get(&ctx.agent_name).ok_or_else(|| {
            XiansError::Configuration(format!("no registered agent named {}", ctx.agent_name))
        })
    }

    /// Look up any registered agent by name
    pub fn try_get_agent(name: &str) -> Option<Arc<Agent>> {
        CURRENT
            .try_with(|c| c.registry.get(name))
            .unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::WorkflowRegistration;

    fn test_registry() -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new();
        registry
            .register(
                Agent::builder("A")
                    .workflow(WorkflowRegistration::new("Chat"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn activity_context(registry: Arc<AgentRegistry>) -> RuntimeContext {
        RuntimeContext {
            kind: ContextKind::Activity,
            tenant_id: Some("acme".into()),
            agent_name: "A".into(),
            workflow_type: "A:Chat".into(),
            workflow_id: "acme:A:Chat:u1".into(),
            run_id: None,
            registry,
        }
    }

    #[tokio::test]
    async fn test_accessors_fail_outside_scope() {
        assert!(matches!(
            Context::current(),
            Err(XiansError::NoAmbientContext)
        ));
        assert!(!Context::is_in_workflow());
        assert!(!Context::is_in_activity());
        assert!(Context::workflow().is_none());
    }

    #[tokio::test]
    async fn test_scope_installs_context() {
        let ctx = activity_context(test_registry());
        Context::scope(ctx, async {
            assert!(Context::is_in_activity());
            assert!(!Context::is_in_workflow());
            assert_eq!(Context::tenant_id().unwrap(), "acme");
            assert_eq!(Context::workflow_type().unwrap(), "A:Chat");

            let workflow = Context::current_workflow().unwrap();
            assert_eq!(workflow.short_name, "Chat");

            assert!(Context::try_get_agent("A").is_some());
            assert!(Context::try_get_agent("B").is_none());
        })
        .await;

        // Torn down after the scope ends.
        assert!(Context::current().is_err());
    }

    #[tokio::test]
    async fn test_context_survives_across_awaits() {
        let ctx = activity_context(test_registry());
        Context::scope(ctx, async {
            tokio::task::yield_now().await;
            assert_eq!(Context::tenant_id().unwrap(), "acme");
        })
        .await;
    }
}
