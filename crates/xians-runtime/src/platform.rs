//! Platform assembly
//!
//! One `Platform` per process: it owns the HTTP client, the engine client,
//! the agent registry and every capability service as plain fields. `run`
//! starts a worker per registered workflow task queue, registers the
//! built-in workflows and system activities on each, and parks until the
//! shutdown watch flips.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use xians_engine::{WorkerOptions, WorkflowEngine};

use crate::a2a::A2ADispatcher;
use crate::activities::{register_handler_activity, register_system_activities, SystemServices};
use crate::agent::{Agent, AgentRegistry};
use crate::client::EngineClient;
use crate::error::XiansError;
use crate::http::{HttpClient, HttpClientConfig};
use crate::identifier;
use crate::messaging::MessagingService;
use crate::options::XiansOptions;
use crate::schedule::ScheduleClient;
use crate::services::{
    DocumentService, KnowledgeService, LocalDocumentProvider, LocalKnowledgeProvider,
    LocalSecretProvider, SecretsService, ServerDocumentProvider, ServerKnowledgeProvider,
    ServerSecretProvider,
};
use crate::task::{TaskService, TaskWorkflow};
use crate::usage::UsageReporter;
use crate::workflows::{AgentWorkflow, ContextInstallingWorkflow};

/// Builder for [`Platform`]
pub struct PlatformBuilder {
    options: XiansOptions,
    engine: Option<Arc<dyn WorkflowEngine>>,
    agents: Vec<Agent>,
}

impl PlatformBuilder {
    /// The durable engine backing this platform
    pub fn engine(mut self, engine: Arc<dyn WorkflowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register an agent; immutable once the platform is built
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn build(self) -> Result<Platform, XiansError> {
        self.options.validate()?;
        let engine = self
            .engine
            .ok_or_else(|| XiansError::Configuration("a workflow engine is required".into()))?;
        let default_tenant = self.options.resolved_tenant();

        let registry = Arc::new(AgentRegistry::new());
        for agent in self.agents {
            if !agent.system_scoped && default_tenant.is_none() {
                return Err(XiansError::Configuration(format!(
                    "agent {} is tenant-scoped but no tenant could be resolved from the options",
                    agent.name
                )));
            }
            registry.register(agent)?;
        }

        let mut http_config = HttpClientConfig::new(&self.options.server_url)
            .with_default_tenant(default_tenant.clone());
        if let Some(token) = self.options.bearer_token() {
            http_config = http_config.with_bearer_token(token);
        }
        http_config.identity_pem = self.options.identity_pem()?;
        let http = Arc::new(HttpClient::new(http_config)?);

        let engine = EngineClient::new(engine);
        let messaging = Arc::new(MessagingService::new(http.clone()));
        let usage = Arc::new(UsageReporter::new(http.clone()));

        let (knowledge, documents, secrets) = if self.options.local_mode {
            (
                Arc::new(KnowledgeService::new(
                    Arc::new(LocalKnowledgeProvider::new()),
                    &self.options.cache.knowledge,
                )),
                Arc::new(DocumentService::new(Arc::new(LocalDocumentProvider::new()))),
                Arc::new(SecretsService::new(Arc::new(LocalSecretProvider::new()))),
            )
        } else {
            (
                Arc::new(KnowledgeService::new(
                    Arc::new(ServerKnowledgeProvider::new(http.clone())),
                    &self.options.cache.knowledge,
                )),
                Arc::new(DocumentService::new(Arc::new(ServerDocumentProvider::new(
                    http.clone(),
                )))),
                Arc::new(SecretsService::new(Arc::new(ServerSecretProvider::new(
                    http.clone(),
                )))),
            )
        };

        let services = Arc::new(SystemServices {
            engine: engine.clone(),
            registry: registry.clone(),
            messaging: messaging.clone(),
            knowledge: knowledge.clone(),
            documents: documents.clone(),
            secrets: secrets.clone(),
            usage: usage.clone(),
        });

        let schedules = ScheduleClient::new(engine.clone(), registry.clone(), default_tenant.clone());
        let tasks = TaskService::new(engine.clone(), registry.clone(), default_tenant.clone());
        let a2a = A2ADispatcher::new(engine.clone(), registry.clone());

        Ok(Platform {
            options: self.options,
            default_tenant,
            http,
            engine,
            registry,
            services,
            messaging,
            knowledge,
            documents,
            secrets,
            usage,
            schedules,
            tasks,
            a2a,
        })
    }
}

/// The assembled runtime
pub struct Platform {
    options: XiansOptions,
    default_tenant: Option<String>,
    http: Arc<HttpClient>,
    engine: EngineClient,
    registry: Arc<AgentRegistry>,
    services: Arc<SystemServices>,
    messaging: Arc<MessagingService>,
    knowledge: Arc<KnowledgeService>,
    documents: Arc<DocumentService>,
    secrets: Arc<SecretsService>,
    usage: Arc<UsageReporter>,
    schedules: ScheduleClient,
    tasks: TaskService,
    a2a: A2ADispatcher,
}

impl Platform {
    pub fn builder(options: XiansOptions) -> PlatformBuilder {
        PlatformBuilder {
            options,
            engine: None,
            agents: Vec::new(),
        }
    }

    pub fn options(&self) -> &XiansOptions {
        &self.options
    }

    pub fn default_tenant(&self) -> Option<&str> {
        self.default_tenant.as_deref()
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn messaging(&self) -> &Arc<MessagingService> {
        &self.messaging
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeService> {
        &self.knowledge
    }

    pub fn documents(&self) -> &Arc<DocumentService> {
        &self.documents
    }

    pub fn secrets(&self) -> &Arc<SecretsService> {
        &self.secrets
    }

    pub fn usage(&self) -> &Arc<UsageReporter> {
        &self.usage
    }

    pub fn schedules(&self) -> &ScheduleClient {
        &self.schedules
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn a2a(&self) -> &A2ADispatcher {
        &self.a2a
    }

    /// Start all workers and park until `shutdown` flips to `true`
    ///
    /// Shutdown stops the workers; in-flight workflow executions are not
    /// terminated.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), XiansError> {
        let mut workers = JoinSet::new();

        for agent in self.registry.agents() {
            for workflow in agent.workflows() {
                let task_queue = identifier::task_queue(
                    &workflow.workflow_type,
                    agent.system_scoped,
                    self.default_tenant.as_deref(),
                )?;
                let worker = self.engine.worker(
                    WorkerOptions::new(&task_queue)
                        .with_identity(format!("{}-{}", workflow.workflow_type, uuid::Uuid::now_v7()))
                        .with_max_concurrent_activities(workflow.workers.max(1) * 4),
                )?;

                let factory: xians_engine::WorkflowFactory = {
                    let registry = self.registry.clone();
                    let agent = agent.clone();
                    let workflow = workflow.clone();
                    let messaging = self.messaging.clone();
                    let default_tenant = self.default_tenant.clone();
                    Arc::new(move || {
                        let inner: Arc<dyn xians_engine::WorkflowRun> = if workflow.is_task {
                            Arc::new(TaskWorkflow::new(messaging.clone()))
                        } else {
                            Arc::new(AgentWorkflow::new(
                                agent.clone(),
                                workflow.clone(),
                                default_tenant.clone(),
                            ))
                        };
                        Arc::new(ContextInstallingWorkflow::new(
                            inner,
                            registry.clone(),
                            agent.name.clone(),
                        ))
                    })
                };
                worker.register_workflow(&workflow.workflow_type, factory);

                register_system_activities(
                    &worker,
                    self.services.clone(),
                    &agent.name,
                    &workflow.workflow_type,
                );
                register_handler_activity(&worker, self.services.clone(), &agent.name, workflow);

                info!(
                    agent = %agent.name,
                    workflow_type = %workflow.workflow_type,
                    task_queue = %task_queue,
                    workers = workflow.workers,
                    "starting worker"
                );

                let shutdown = shutdown.clone();
                workers.spawn(async move { worker.run(shutdown).await });
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "worker exited with error"),
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }
        Ok(())
    }
}
