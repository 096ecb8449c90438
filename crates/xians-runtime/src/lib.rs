//! # Xians Agent Runtime
//!
//! A multi-tenant agent runtime over a durable workflow engine. Agents
//! register workflows; the platform routes executions to tenant-scoped or
//! shared worker pools and gives handlers uniform capability services:
//! messaging, knowledge, documents, secrets, schedules, HITL tasks and
//! agent-to-agent calls.
//!
//! ## Tenancy
//!
//! Workflow ids carry the tenant as their first component
//! (`acme:MyAgent:Chat:run-123`); [`identifier`] is the single source of
//! truth for parsing them and deriving task queue names. The ambient
//! [`context::Context`] exposes the execution's tenant to every capability
//! service, and each outbound backend request is stamped with
//! `X-Tenant-Id`.
//!
//! ## Context-aware execution
//!
//! The same service call executes as an engine activity when made from
//! workflow code (preserving determinism) and as a direct RPC everywhere
//! else; see [`executor`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xians_engine::InMemoryEngine;
//! use xians_runtime::prelude::*;
//!
//! let agent = Agent::builder("Support")
//!     .workflow(WorkflowRegistration::new("Chat").with_handler(message_handler(
//!         |ctx| async move { ctx.reply("hello").await },
//!     )))
//!     .build()?;
//!
//! let platform = Platform::builder(
//!     XiansOptions::new("https://api.example.com").with_api_key("sk-…"),
//! )
//! .engine(Arc::new(InMemoryEngine::new()))
//! .agent(agent)
//! .build()?;
//!
//! let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
//! platform.run(shutdown_rx).await?;
//! ```

pub mod a2a;
pub mod activities;
pub mod agent;
pub mod client;
pub mod context;
pub mod error;
pub mod executor;
pub mod http;
pub mod identifier;
pub mod logging;
pub mod messaging;
pub mod options;
pub mod platform;
pub mod schedule;
pub mod services;
pub mod task;
pub mod usage;
pub mod workflows;

/// Prelude for common imports
pub mod prelude {
    pub use crate::a2a::{A2ADispatcher, A2ATarget};
    pub use crate::agent::{Agent, AgentRegistry, WorkflowRegistration, XiansWorkflow};
    pub use crate::client::EngineClient;
    pub use crate::context::Context;
    pub use crate::error::XiansError;
    pub use crate::http::{HttpClient, HttpClientConfig};
    pub use crate::messaging::{
        message_handler, MessageHandler, MessagingService, OutgoingMessage, UserMessage,
        UserMessageContext,
    };
    pub use crate::options::XiansOptions;
    pub use crate::platform::Platform;
    pub use crate::schedule::ScheduleClient;
    pub use crate::services::{
        DocumentService, KnowledgeService, SecretsService,
    };
    pub use crate::task::{HitlTask, TaskService, TaskWorkflowRequest};
    pub use crate::usage::{UsageRecord, UsageReporter};
}

// Re-export key types at crate root
pub use a2a::{A2ADispatcher, A2ATarget};
pub use agent::{Agent, AgentRegistry, WorkflowRegistration, XiansWorkflow};
pub use client::{EngineClient, EngineSettings};
pub use context::Context;
pub use error::XiansError;
pub use http::{HttpClient, HttpClientConfig, HttpError};
pub use messaging::{
    message_handler, MessageHandler, MessagingService, OutgoingMessage, UserMessage,
    UserMessageContext,
};
pub use options::XiansOptions;
pub use platform::Platform;
pub use schedule::{ScheduleBuilder, ScheduleClient, ScheduleHandle};
pub use task::{
    HitlTask, TaskInfo, TaskService, TaskWorkflowRequest, TaskWorkflowResult,
};
pub use usage::{UsageRecord, UsageReporter};
