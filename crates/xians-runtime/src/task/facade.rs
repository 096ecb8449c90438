//! External access to HITL tasks
//!
//! `TaskService` creates task workflows (as children when called from a
//! workflow, top-level otherwise); `HitlTask` is the facade over one task,
//! addressed by its workflow id.

use std::sync::Arc;

use uuid::Uuid;
use xians_engine::{ChildWorkflowOptions, Memo, StartWorkflowOptions};

use crate::agent::AgentRegistry;
use crate::client::EngineClient;
use crate::context::Context;
use crate::error::XiansError;
use crate::identifier;

use super::state::{TaskInfo, TaskWorkflowRequest, TaskWorkflowResult};
use super::workflow::{names, LegacyActionRequest, PerformActionRequest, UpdateDraftRequest};

/// Creates HITL task workflows
pub struct TaskService {
    engine: EngineClient,
    registry: Arc<AgentRegistry>,
    default_tenant: Option<String>,
}

impl TaskService {
    pub fn new(
        engine: EngineClient,
        registry: Arc<AgentRegistry>,
        default_tenant: Option<String>,
    ) -> Self {
        Self {
            engine,
            registry,
            default_tenant,
        }
    }

    /// Create a task hosted by the named agent
    ///
    /// From workflow code the task starts as an abandoned child and inherits
    /// the parent's tenant; otherwise it starts top-level under the ambient
    /// or default tenant.
    pub async fn create(
        &self,
        agent_name: &str,
        mut request: TaskWorkflowRequest,
    ) -> Result<HitlTask, XiansError> {
        let agent = self.registry.get(agent_name).ok_or_else(|| {
            XiansError::Configuration(format!("no registered agent named {agent_name}"))
        })?;
        let workflow_type = agent.task_workflow().workflow_type.clone();

        let tenant = match Context::current().ok().and_then(|c| c.tenant_id) {
            Some(tenant) => tenant,
            None => self.default_tenant.clone().ok_or_else(|| {
                XiansError::Configuration("no tenant available for task creation".into())
            })?,
        };

        let workflow = Context::workflow();
        if request.task_id.is_empty() {
            request.task_id = match &workflow {
                Some(ctx) => ctx.new_guid().to_string(),
                None => Uuid::now_v7().to_string(),
            };
        }
        if request.creator_workflow_id.is_none() {
            request.creator_workflow_id = Context::workflow_id().ok();
        }

        let workflow_id = identifier::build(&tenant, &workflow_type, Some(&request.task_id));
        let task_queue =
            identifier::task_queue(&workflow_type, agent.system_scoped, Some(&tenant))?;
        let memo = Memo::for_tenant(&tenant, agent.system_scoped);
        let input = serde_json::to_value(&request)?;

        match workflow {
            // Abandoned by default: the task outlives its creator.
            Some(ctx) => {
                ctx.start_child_workflow(
                    ChildWorkflowOptions::new(&workflow_type, &workflow_id, input)
                        .with_task_queue(&task_queue)
                        .with_memo(memo),
                )
                .await?;
            }
            None => {
                self.engine
                    .start_workflow(
                        StartWorkflowOptions::new(&workflow_type, &workflow_id, &task_queue, input)
                            .with_memo(memo),
                    )
                    .await?;
            }
        }

        Ok(HitlTask {
            engine: self.engine.clone(),
            workflow_id,
            task_id: request.task_id,
        })
    }

    /// Attach to an existing task by its workflow id
    pub fn get(&self, workflow_id: &str) -> Result<HitlTask, XiansError> {
        HitlTask::from_workflow_id(self.engine.clone(), &self.registry, workflow_id)
    }
}

/// Facade over one HITL task workflow
pub struct HitlTask {
    engine: EngineClient,
    workflow_id: String,
    task_id: String,
}

impl HitlTask {
    /// Parse a task workflow id and verify it addresses a registered task
    /// workflow
    pub fn from_workflow_id(
        engine: EngineClient,
        registry: &AgentRegistry,
        workflow_id: &str,
    ) -> Result<Self, XiansError> {
        let parsed = identifier::parse(workflow_id)?;
        let (_, workflow) = registry.find_workflow(&parsed.workflow_type).ok_or_else(|| {
            XiansError::InvalidWorkflowId(format!(
                "no registered workflow for type {}",
                parsed.workflow_type
            ))
        })?;
        if !workflow.is_task {
            return Err(XiansError::InvalidWorkflowId(format!(
                "{workflow_id} does not address a task workflow"
            )));
        }

        let task_id = workflow_id
            .split(':')
            .skip(3)
            .collect::<Vec<_>>()
            .join(":");
        Ok(Self {
            engine,
            workflow_id: workflow_id.to_string(),
            task_id,
        })
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Current snapshot via the `get_task_info` query
    pub async fn get_info(&self) -> Result<TaskInfo, XiansError> {
        self.engine
            .query(&self.workflow_id, names::GET_TASK_INFO, &serde_json::json!({}))
            .await
    }

    pub async fn is_completed(&self) -> Result<bool, XiansError> {
        Ok(self.get_info().await?.is_completed)
    }

    /// Replace the draft work
    pub async fn update_draft(&self, text: impl Into<String>) -> Result<(), XiansError> {
        self.engine
            .signal(
                &self.workflow_id,
                names::UPDATE_DRAFT,
                &UpdateDraftRequest { text: text.into() },
            )
            .await
    }

    /// Perform an action, closing the task
    pub async fn perform_action(
        &self,
        action: impl Into<String>,
        comment: Option<String>,
    ) -> Result<(), XiansError> {
        self.engine
            .signal(
                &self.workflow_id,
                names::PERFORM_ACTION,
                &PerformActionRequest {
                    action: action.into(),
                    comment,
                },
            )
            .await
    }

    /// Legacy approve alias
    pub async fn approve(&self, comment: Option<String>) -> Result<(), XiansError> {
        self.engine
            .signal(
                &self.workflow_id,
                names::APPROVE,
                &LegacyActionRequest { comment },
            )
            .await
    }

    /// Legacy reject alias
    pub async fn reject(&self, comment: Option<String>) -> Result<(), XiansError> {
        self.engine
            .signal(
                &self.workflow_id,
                names::REJECT,
                &LegacyActionRequest { comment },
            )
            .await
    }

    /// Await the task workflow's result
    pub async fn result(&self) -> Result<TaskWorkflowResult, XiansError> {
        self.engine.result(&self.workflow_id).await
    }
}
