//! Agent and workflow registration
//!
//! Agents own workflow registrations; both are immutable once the platform
//! starts. The registry maps agent names to agents and is the only place
//! workflow types are resolved back to their owners.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::XiansError;
use crate::messaging::MessageHandler;

/// Workflow type suffix reserved for HITL task workflows
pub const TASK_WORKFLOW_NAME: &str = "Task Workflow";

/// Read-only query handler registered on a workflow type
pub type QueryHandler = Arc<dyn Fn(Value) -> Result<Value, XiansError> + Send + Sync>;

/// Custom signal handler registered on a workflow type
pub type SignalHandler = Arc<dyn Fn(Value) -> Result<(), XiansError> + Send + Sync>;

/// Update handler registered on a workflow type
pub type UpdateHandler = Arc<dyn Fn(Value) -> Result<Value, XiansError> + Send + Sync>;

/// Validator run before an update is durably processed
pub type UpdateValidator = Arc<dyn Fn(&Value) -> Result<(), XiansError> + Send + Sync>;

/// A workflow registration as supplied by the agent author
pub struct WorkflowRegistration {
    short_name: String,
    workers: usize,
    is_default: bool,
    handler: Option<MessageHandler>,
    queries: HashMap<String, QueryHandler>,
    signals: HashMap<String, SignalHandler>,
    updates: HashMap<String, (Option<UpdateValidator>, UpdateHandler)>,
}

impl WorkflowRegistration {
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            workers: 1,
            is_default: false,
            handler: None,
            queries: HashMap::new(),
            signals: HashMap::new(),
            updates: HashMap::new(),
        }
    }

    /// Number of concurrent workers on this workflow's task queue
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Mark as the agent's default workflow
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// The message handler invoked per user message
    pub fn with_handler(mut self, handler: MessageHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Register a read-only query handler
    pub fn with_query(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(Value) -> Result<Value, XiansError> + Send + Sync + 'static,
    ) -> Self {
        self.queries.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a custom signal handler
    pub fn with_signal(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(Value) -> Result<(), XiansError> + Send + Sync + 'static,
    ) -> Self {
        self.signals.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register an update handler
    pub fn with_update(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(Value) -> Result<Value, XiansError> + Send + Sync + 'static,
    ) -> Self {
        self.updates.insert(name.into(), (None, Arc::new(handler)));
        self
    }

    /// Register an update handler with a validator that runs before durable
    /// processing
    pub fn with_validated_update(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(&Value) -> Result<(), XiansError> + Send + Sync + 'static,
        handler: impl Fn(Value) -> Result<Value, XiansError> + Send + Sync + 'static,
    ) -> Self {
        self.updates
            .insert(name.into(), (Some(Arc::new(validator)), Arc::new(handler)));
        self
    }
}

/// A resolved workflow descriptor owned by an agent
pub struct XiansWorkflow {
    /// Owning agent name
    pub agent_name: String,

    /// Short name within the agent, e.g. `Chat`
    pub short_name: String,

    /// Agent-qualified workflow type, e.g. `MyAgent:Chat`
    pub workflow_type: String,

    /// Concurrent workers on the task queue
    pub workers: usize,

    /// Whether this is the agent's default workflow
    pub is_default: bool,

    /// Whether this is the agent's HITL task workflow
    pub is_task: bool,

    /// Message handler, absent for task workflows
    pub handler: Option<MessageHandler>,

    pub(crate) queries: HashMap<String, QueryHandler>,
    pub(crate) signals: HashMap<String, SignalHandler>,
    pub(crate) updates: HashMap<String, (Option<UpdateValidator>, UpdateHandler)>,
}

impl std::fmt::Debug for XiansWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XiansWorkflow")
            .field("workflow_type", &self.workflow_type)
            .field("workers", &self.workers)
            .field("is_default", &self.is_default)
            .field("is_task", &self.is_task)
            .finish()
    }
}

/// A registered runtime unit owning workflow definitions
pub struct Agent {
    /// Agent name; the first half of every workflow type
    pub name: String,

    /// Whether this agent's workers process executions from any tenant
    pub system_scoped: bool,

    workflows: Vec<Arc<XiansWorkflow>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            system_scoped: false,
            registrations: Vec::new(),
        }
    }

    pub fn workflows(&self) -> &[Arc<XiansWorkflow>] {
        &self.workflows
    }

    /// The default message workflow, if one is marked
    pub fn default_workflow(&self) -> Option<&Arc<XiansWorkflow>> {
        self.workflows.iter().find(|w| w.is_default)
    }

    /// The agent's HITL task workflow
    pub fn task_workflow(&self) -> &Arc<XiansWorkflow> {
        self.workflows
            .iter()
            .find(|w| w.is_task)
            .expect("task workflow is registered for every agent")
    }

    pub fn find_workflow(&self, workflow_type: &str) -> Option<&Arc<XiansWorkflow>> {
        self.workflows
            .iter()
            .find(|w| w.workflow_type == workflow_type)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("system_scoped", &self.system_scoped)
            .field(
                "workflows",
                &self
                    .workflows
                    .iter()
                    .map(|w| w.workflow_type.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    name: String,
    system_scoped: bool,
    registrations: Vec<WorkflowRegistration>,
}

impl AgentBuilder {
    /// Process executions from any tenant on shared queues
    pub fn system_scoped(mut self, system_scoped: bool) -> Self {
        self.system_scoped = system_scoped;
        self
    }

    /// Add a message workflow
    pub fn workflow(mut self, registration: WorkflowRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Validate and assemble the agent
    ///
    /// Every agent gets a HITL task workflow (`{name}:Task Workflow`); when
    /// exactly one message workflow is registered it becomes the default.
    pub fn build(self) -> Result<Agent, XiansError> {
        if self.name.is_empty() {
            return Err(XiansError::Configuration("agent name must not be empty".into()));
        }
        if self.name.contains(':') {
            return Err(XiansError::Configuration(format!(
                "agent name must not contain ':': {}",
                self.name
            )));
        }

        let defaults = self.registrations.iter().filter(|r| r.is_default).count();
        if defaults > 1 {
            return Err(XiansError::Configuration(format!(
                "agent {} has {defaults} default workflows",
                self.name
            )));
        }
        let implicit_default = defaults == 0 && self.registrations.len() == 1;

        let mut workflows = Vec::with_capacity(self.registrations.len() + 1);
        for registration in self.registrations {
            if registration.short_name.is_empty() {
                return Err(XiansError::Configuration(format!(
                    "workflow name must not be empty (agent {})",
                    self.name
                )));
            }
            if registration.short_name == TASK_WORKFLOW_NAME {
                return Err(XiansError::Configuration(format!(
                    "{TASK_WORKFLOW_NAME:?} is reserved for the task workflow (agent {})",
                    self.name
                )));
            }
            workflows.push(Arc::new(XiansWorkflow {
                agent_name: self.name.clone(),
                workflow_type: format!("{}:{}", self.name, registration.short_name),
                short_name: registration.short_name,
                workers: registration.workers,
                is_default: registration.is_default || implicit_default,
                is_task: false,
                handler: registration.handler,
                queries: registration.queries,
                signals: registration.signals,
                updates: registration.updates,
            }));
        }

        workflows.push(Arc::new(XiansWorkflow {
            agent_name: self.name.clone(),
            workflow_type: format!("{}:{}", self.name, TASK_WORKFLOW_NAME),
            short_name: TASK_WORKFLOW_NAME.to_string(),
            workers: 1,
            is_default: false,
            is_task: true,
            handler: None,
            queries: HashMap::new(),
            signals: HashMap::new(),
            updates: HashMap::new(),
        }));

        Ok(Agent {
            name: self.name,
            system_scoped: self.system_scoped,
            workflows,
        })
    }
}

/// Registry of agents, owned by the platform
///
/// Agents hold workflow descriptors; the registry holds the agents. There
/// are no ownership cycles: descriptors refer to their agent by name only.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: Agent) -> Result<Arc<Agent>, XiansError> {
        let agent = Arc::new(agent);
        match self.agents.entry(agent.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(XiansError::Configuration(format!(
                "agent already registered: {}",
                agent.name
            ))),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(agent.clone());
                Ok(agent)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).map(|a| a.clone())
    }

    /// Resolve a workflow type back to its owning agent and descriptor
    pub fn find_workflow(&self, workflow_type: &str) -> Option<(Arc<Agent>, Arc<XiansWorkflow>)> {
        let agent_name = workflow_type.split(':').next()?;
        let agent = self.get(agent_name)?;
        let workflow = agent.find_workflow(workflow_type)?.clone();
        Some((agent, workflow))
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.iter().map(|a| a.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_type_is_agent_qualified() {
        let agent = Agent::builder("My Agent")
            .workflow(WorkflowRegistration::new("Chat"))
            .build()
            .unwrap();

        assert!(agent.find_workflow("My Agent:Chat").is_some());
        assert_eq!(
            agent.task_workflow().workflow_type,
            "My Agent:Task Workflow"
        );
    }

    #[test]
    fn test_single_workflow_becomes_default() {
        let agent = Agent::builder("A")
            .workflow(WorkflowRegistration::new("Chat"))
            .build()
            .unwrap();

        assert_eq!(
            agent.default_workflow().unwrap().workflow_type,
            "A:Chat"
        );
    }

    #[test]
    fn test_multiple_defaults_rejected() {
        let err = Agent::builder("A")
            .workflow(WorkflowRegistration::new("Chat").as_default())
            .workflow(WorkflowRegistration::new("Alerts").as_default())
            .build()
            .unwrap_err();

        assert!(matches!(err, XiansError::Configuration(_)));
    }

    #[test]
    fn test_empty_and_colon_names_rejected() {
        assert!(Agent::builder("").build().is_err());
        assert!(Agent::builder("A:B").build().is_err());
        assert!(Agent::builder("A")
            .workflow(WorkflowRegistration::new(""))
            .build()
            .is_err());
    }

    #[test]
    fn test_reserved_task_name_rejected() {
        let err = Agent::builder("A")
            .workflow(WorkflowRegistration::new(TASK_WORKFLOW_NAME))
            .build()
            .unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }

    #[test]
    fn test_registry_resolves_workflow_types() {
        let registry = AgentRegistry::new();
        registry
            .register(
                Agent::builder("A")
                    .workflow(WorkflowRegistration::new("Chat"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let (agent, workflow) = registry.find_workflow("A:Chat").unwrap();
        assert_eq!(agent.name, "A");
        assert_eq!(workflow.short_name, "Chat");
        assert!(registry.find_workflow("B:Chat").is_none());
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let registry = AgentRegistry::new();
        registry.register(Agent::builder("A").build().unwrap()).unwrap();

        let err = registry
            .register(Agent::builder("A").build().unwrap())
            .unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }
}
