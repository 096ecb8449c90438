//! Built-in workflow implementations
//!
//! `AgentWorkflow` is the long-running message coordinator every registered
//! message workflow compiles down to: it queues `user_message` signals and
//! processes them one at a time through the handler activity, enforcing
//! tenant isolation per message. `ContextInstallingWorkflow` wraps every
//! registered instance so the ambient context is live for the whole run
//! body.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};
use xians_engine::{
    ActivityOptions, SignalContext, WorkflowContext, WorkflowError, WorkflowRun,
};

use crate::activities::HandlerActivityInput;
use crate::agent::{Agent, AgentRegistry, XiansWorkflow};
use crate::context::{Context, ContextKind, RuntimeContext};
use crate::executor::activity_names;
use crate::identifier;
use crate::messaging::{MessageKind, OutgoingMessage, UserMessage};

/// Signal and query names of the built-in agent workflow
pub mod names {
    pub const USER_MESSAGE: &str = "user_message";
    pub const GET_STATUS: &str = "get_status";
}

/// The built-in message coordinator
pub struct AgentWorkflow {
    agent: Arc<Agent>,
    workflow: Arc<XiansWorkflow>,
    /// Agent credential tenant, used for the isolation check
    agent_tenant: Option<String>,
    inbox: Mutex<VecDeque<UserMessage>>,
}

impl AgentWorkflow {
    pub fn new(
        agent: Arc<Agent>,
        workflow: Arc<XiansWorkflow>,
        agent_tenant: Option<String>,
    ) -> Self {
        Self {
            agent,
            workflow,
            agent_tenant,
            inbox: Mutex::new(VecDeque::new()),
        }
    }

    async fn process(&self, ctx: &WorkflowContext, message: UserMessage) {
        let execution_tenant = identifier::extract_tenant(ctx.workflow_id())
            .map(str::to_string)
            .unwrap_or_else(|_| message.tenant_id.clone());

        if !identifier::validate_isolation(
            &execution_tenant,
            self.agent_tenant.as_deref(),
            self.agent.system_scoped,
        ) {
            error!(
                workflow_id = %ctx.workflow_id(),
                execution_tenant = %execution_tenant,
                agent_tenant = self.agent_tenant.as_deref().unwrap_or("<none>"),
                "tenant isolation violation, message not processed"
            );
            self.send_isolation_reply(ctx, &execution_tenant, &message).await;
            return;
        }

        let input = HandlerActivityInput {
            message,
            capture: false,
        };
        let activity = activity_names::handler(&self.workflow.workflow_type);
        match serde_json::to_value(&input) {
            Ok(payload) => {
                if let Err(e) = ctx
                    .execute_activity(&activity, payload, ActivityOptions::default())
                    .await
                {
                    // The handler activity replies on its own errors; this
                    // is the backstop for infrastructure failures.
                    warn!(
                        workflow_id = %ctx.workflow_id(),
                        error = %e,
                        "handler activity failed"
                    );
                }
            }
            Err(e) => warn!(error = %e, "user message serialization failed"),
        }
    }

    /// Exactly one error reply per rejected execution
    async fn send_isolation_reply(
        &self,
        ctx: &WorkflowContext,
        execution_tenant: &str,
        message: &UserMessage,
    ) {
        let reply = OutgoingMessage {
            tenant_id: execution_tenant.to_string(),
            participant_id: message.participant_id.clone(),
            thread_id: message.thread_id.clone(),
            request_id: Some(message.request_id.clone()),
            scope: message.scope.clone(),
            workflow_type: Some(self.workflow.workflow_type.clone()),
            kind: MessageKind::Error,
            text: Some(format!(
                "Tenant isolation violation: this agent does not process executions for tenant {execution_tenant}"
            )),
            data: None,
        };
        match serde_json::to_value(&reply) {
            Ok(payload) => {
                if let Err(e) = ctx
                    .execute_activity(
                        activity_names::MESSAGE_SEND,
                        payload,
                        ActivityOptions::default(),
                    )
                    .await
                {
                    warn!(error = %e, "isolation error reply failed");
                }
            }
            Err(e) => warn!(error = %e, "isolation reply serialization failed"),
        }
    }
}

#[async_trait::async_trait]
impl WorkflowRun for AgentWorkflow {
    async fn run(
        &self,
        ctx: WorkflowContext,
        _input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        loop {
            ctx.wait_condition(
                || !self.inbox.lock().is_empty() || ctx.is_cancelled(),
                None,
            )
            .await;

            let message = self.inbox.lock().pop_front();
            match message {
                Some(message) => self.process(&ctx, message).await,
                None if ctx.is_cancelled() => return Ok(serde_json::Value::Null),
                None => {}
            }
        }
    }

    fn handle_signal(
        &self,
        _ctx: &SignalContext,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        if name == names::USER_MESSAGE {
            let message: UserMessage = serde_json::from_value(payload)
                .map_err(|e| WorkflowError::new(format!("invalid user message: {e}")))?;
            self.inbox.lock().push_back(message);
            return Ok(());
        }
        if let Some(handler) = self.workflow.signals.get(name) {
            return handler(payload).map_err(|e| WorkflowError::new(e.to_string()));
        }
        Err(WorkflowError::new(format!("unknown signal: {name}")))
    }

    fn handle_query(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        if name == names::GET_STATUS {
            return Ok(serde_json::json!({
                "pending": self.inbox.lock().len(),
            }));
        }
        if let Some(handler) = self.workflow.queries.get(name) {
            return handler(args).map_err(|e| WorkflowError::new(e.to_string()));
        }
        Err(WorkflowError::new(format!("unknown query: {name}")))
    }

    fn validate_update(&self, name: &str, args: &serde_json::Value) -> Result<(), WorkflowError> {
        match self.workflow.updates.get(name) {
            Some((Some(validator), _)) => {
                validator(args).map_err(|e| WorkflowError::new(e.to_string()))
            }
            Some((None, _)) => Ok(()),
            None => Ok(()),
        }
    }

    fn handle_update(
        &self,
        _ctx: &SignalContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        match self.workflow.updates.get(name) {
            Some((_, handler)) => handler(args).map_err(|e| WorkflowError::new(e.to_string())),
            None => Err(WorkflowError::new(format!("unknown update: {name}"))),
        }
    }
}

/// Installs the ambient [`RuntimeContext`] around a workflow's run body
///
/// Signals, queries and updates stay on the inner instance unwrapped; they
/// only touch workflow state.
pub(crate) struct ContextInstallingWorkflow {
    inner: Arc<dyn WorkflowRun>,
    registry: Arc<AgentRegistry>,
    agent_name: String,
}

impl ContextInstallingWorkflow {
    pub(crate) fn new(
        inner: Arc<dyn WorkflowRun>,
        registry: Arc<AgentRegistry>,
        agent_name: String,
    ) -> Self {
        Self {
            inner,
            registry,
            agent_name,
        }
    }
}

#[async_trait::async_trait]
impl WorkflowRun for ContextInstallingWorkflow {
    async fn run(
        &self,
        ctx: WorkflowContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let tenant_id = ctx.memo().tenant_id.clone().or_else(|| {
            identifier::extract_tenant(ctx.workflow_id())
                .ok()
                .map(str::to_string)
        });
        let runtime_ctx = RuntimeContext {
            kind: ContextKind::Workflow(ctx.clone()),
            tenant_id,
            agent_name: self.agent_name.clone(),
            workflow_type: ctx.workflow_type().to_string(),
            workflow_id: ctx.workflow_id().to_string(),
            run_id: Some(ctx.run_id().to_string()),
            registry: self.registry.clone(),
        };
        Context::scope(runtime_ctx, self.inner.run(ctx, input)).await
    }

    fn handle_signal(
        &self,
        ctx: &SignalContext,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        self.inner.handle_signal(ctx, name, payload)
    }

    fn handle_query(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        self.inner.handle_query(name, args)
    }

    fn validate_update(&self, name: &str, args: &serde_json::Value) -> Result<(), WorkflowError> {
        self.inner.validate_update(name, args)
    }

    fn handle_update(
        &self,
        ctx: &SignalContext,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        self.inner.handle_update(ctx, name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::WorkflowRegistration;

    fn workflow_under_test() -> AgentWorkflow {
        let agent = Arc::new(
            Agent::builder("A")
                .workflow(
                    WorkflowRegistration::new("Chat")
                        .with_query("custom", |_| Ok(serde_json::json!({"ok": true}))),
                )
                .build()
                .unwrap(),
        );
        let workflow = agent.find_workflow("A:Chat").unwrap().clone();
        AgentWorkflow::new(agent.clone(), workflow, Some("acme".into()))
    }

    fn signal_ctx() -> SignalContext {
        SignalContext {
            workflow_id: "acme:A:Chat:u1".into(),
            now: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_user_message_signal_enqueues() {
        let workflow = workflow_under_test();
        let payload = serde_json::json!({
            "tenantId": "acme",
            "participantId": "u1",
            "requestId": "r1",
            "text": "hi"
        });

        workflow
            .handle_signal(&signal_ctx(), names::USER_MESSAGE, payload)
            .unwrap();

        let status = workflow
            .handle_query(names::GET_STATUS, serde_json::json!({}))
            .unwrap();
        assert_eq!(status["pending"], 1);
    }

    #[test]
    fn test_malformed_user_message_rejected() {
        let workflow = workflow_under_test();
        let err = workflow
            .handle_signal(&signal_ctx(), names::USER_MESSAGE, serde_json::json!("nope"))
            .unwrap_err();
        assert!(err.message.contains("invalid user message"));
    }

    #[test]
    fn test_custom_query_handler() {
        let workflow = workflow_under_test();
        let out = workflow
            .handle_query("custom", serde_json::json!({}))
            .unwrap();
        assert_eq!(out["ok"], true);
    }

    #[test]
    fn test_unknown_update_rejected() {
        let workflow = workflow_under_test();
        let err = workflow
            .handle_update(&signal_ctx(), "nope", serde_json::json!({}))
            .unwrap_err();
        assert!(err.message.contains("unknown update"));
    }
}
