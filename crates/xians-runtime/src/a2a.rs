//! Agent-to-agent messaging
//!
//! Synchronous request/reply between workflows over the engine's
//! signal/query/update primitives, plus an isolated chat invocation that
//! runs the target's message handler in an activity and captures its first
//! reply. Every dispatch stamps the caller's tenant; crossing tenants is
//! allowed only for system-scoped callers.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::client::EngineClient;
use crate::context::Context;
use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::identifier;
use crate::messaging::{OutgoingMessage, UserMessage};

/// A target workflow, by full id or by type + tenant + suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum A2ATarget {
    Id(String),
    Typed {
        workflow_type: String,
        tenant: String,
        suffix: Option<String>,
    },
}

impl A2ATarget {
    pub fn by_id(workflow_id: impl Into<String>) -> Self {
        Self::Id(workflow_id.into())
    }

    pub fn of(
        workflow_type: impl Into<String>,
        tenant: impl Into<String>,
        suffix: Option<String>,
    ) -> Self {
        Self::Typed {
            workflow_type: workflow_type.into(),
            tenant: tenant.into(),
            suffix,
        }
    }

    fn workflow_id(&self) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::Typed {
                workflow_type,
                tenant,
                suffix,
            } => identifier::build(tenant, workflow_type, suffix.as_deref()),
        }
    }
}

/// Envelope carried by the A2A system activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2AEnvelope {
    pub target_workflow_id: String,
    pub name: String,
    pub args: serde_json::Value,
    /// Caller tenant stamped at dispatch time
    pub caller_tenant: String,
}

/// Input to the isolated chat activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2AChatRequest {
    pub task_queue: String,
    pub workflow_type: String,
    pub message: UserMessage,
}

/// Dispatcher for agent-to-agent calls
pub struct A2ADispatcher {
    engine: EngineClient,
    registry: Arc<AgentRegistry>,
}

impl A2ADispatcher {
    pub fn new(engine: EngineClient, registry: Arc<AgentRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Fire-and-forget signal to another workflow
    pub async fn send_signal(
        &self,
        target: &A2ATarget,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<(), XiansError> {
        let envelope = self.envelope(target, name, args)?;
        executor::execute(activity_names::A2A_SIGNAL, &envelope, async {
            self.engine
                .signal(&envelope.target_workflow_id, &envelope.name, &envelope.args)
                .await?;
            Ok(serde_json::Value::Null)
        })
        .await
        .map(|_: serde_json::Value| ())
    }

    /// Read-only query against another workflow
    pub async fn query<T: DeserializeOwned>(
        &self,
        target: &A2ATarget,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<T, XiansError> {
        let envelope = self.envelope(target, name, args)?;
        let value: serde_json::Value =
            executor::execute(activity_names::A2A_QUERY, &envelope, async {
                self.engine
                    .query(&envelope.target_workflow_id, &envelope.name, &envelope.args)
                    .await
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Synchronous update against another workflow
    ///
    /// The target must have a registered update handler; its validator (if
    /// any) may reject before durable processing.
    pub async fn update<T: DeserializeOwned>(
        &self,
        target: &A2ATarget,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<T, XiansError> {
        let envelope = self.envelope(target, name, args)?;
        let value: serde_json::Value =
            executor::execute(activity_names::A2A_UPDATE, &envelope, async {
                self.engine
                    .update(&envelope.target_workflow_id, &envelope.name, &envelope.args)
                    .await
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run the target workflow's message handler in an isolated activity on
    /// its task queue and return the first captured reply
    pub async fn send_chat_to_built_in(
        &self,
        workflow_type: &str,
        text: impl Into<String>,
    ) -> Result<Option<OutgoingMessage>, XiansError> {
        let caller = Context::current()?;
        let caller_tenant = caller
            .tenant_id
            .clone()
            .ok_or_else(|| XiansError::Configuration("caller has no tenant".into()))?;

        let (agent, workflow) = self.registry.find_workflow(workflow_type).ok_or_else(|| {
            XiansError::Configuration(format!("no registered workflow for type {workflow_type}"))
        })?;
        if workflow.handler.is_none() {
            return Err(XiansError::Configuration(format!(
                "workflow {workflow_type} has no message handler"
            )));
        }
        let task_queue =
            identifier::task_queue(workflow_type, agent.system_scoped, Some(&caller_tenant))?;

        let request = A2AChatRequest {
            task_queue: task_queue.clone(),
            workflow_type: workflow_type.to_string(),
            message: UserMessage {
                tenant_id: caller_tenant,
                participant_id: caller.workflow_id.clone(),
                request_id: Uuid::now_v7().to_string(),
                scope: None,
                thread_id: None,
                authorization: None,
                text: Some(text.into()),
                data: None,
                metadata: serde_json::Map::new(),
            },
        };

        let output: crate::activities::HandlerActivityOutput =
            executor::execute(activity_names::A2A_CHAT, &request, async {
                crate::activities::run_isolated_chat(&self.engine, &request).await
            })
            .await?;
        Ok(output.captured.into_iter().next())
    }

    /// Build the envelope, enforcing the cross-tenant rule
    fn envelope(
        &self,
        target: &A2ATarget,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<A2AEnvelope, XiansError> {
        let caller = Context::current()?;
        let caller_tenant = caller
            .tenant_id
            .clone()
            .ok_or_else(|| XiansError::Configuration("caller has no tenant".into()))?;

        let target_workflow_id = target.workflow_id();
        let target_tenant = identifier::extract_tenant(&target_workflow_id)?.to_string();
        let system_scoped = self
            .registry
            .get(&caller.agent_name)
            .map(|a| a.system_scoped)
            .unwrap_or(false);
        if !system_scoped && target_tenant != caller_tenant {
            return Err(XiansError::TenantIsolationViolation {
                execution_tenant: target_tenant,
                agent_tenant: caller_tenant,
            });
        }

        Ok(A2AEnvelope {
            target_workflow_id,
            name: name.to_string(),
            args: serde_json::to_value(args)?,
            caller_tenant,
        })
    }
}
