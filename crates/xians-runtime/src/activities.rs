//! System activity registration
//!
//! Every worker registers the same set of named system activities; the
//! context-aware executor dispatches to them when capability services are
//! called from workflow code. Each handler installs a fresh ambient
//! activity context, logs failures with their tenancy, and rethrows so the
//! engine can retry per policy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;
use xians_engine::{
    activity_handler, ActivityContext, ActivityError, ActivityOptions, EngineWorker,
};

use crate::a2a::{A2AChatRequest, A2AEnvelope};
use crate::agent::AgentRegistry;
use crate::client::EngineClient;
use crate::context::{Context, ContextKind, RuntimeContext};
use crate::error::XiansError;
use crate::executor::activity_names;
use crate::http::HttpError;
use crate::messaging::{
    MessagingService, OutgoingMessage, ReplySink, UserMessage, UserMessageContext,
};
use crate::schedule::{create_if_not_exists, CreateScheduleRequest};
use crate::services::documents::DocumentRequest;
use crate::services::knowledge::KnowledgeRequest;
use crate::services::secrets::SecretRequest;
use crate::services::{DocumentService, KnowledgeService, SecretsService};
use crate::usage::{UsageRecord, UsageReporter};

/// Input of the per-workflow handler activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerActivityInput {
    pub message: UserMessage,

    /// Capture replies in the result instead of delivering them; used by
    /// isolated A2A chat
    #[serde(default)]
    pub capture: bool,
}

/// Output of the per-workflow handler activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerActivityOutput {
    #[serde(default)]
    pub captured: Vec<OutgoingMessage>,
}

/// Shared dependencies of the system activity handlers
pub(crate) struct SystemServices {
    pub engine: EngineClient,
    pub registry: Arc<AgentRegistry>,
    pub messaging: Arc<MessagingService>,
    pub knowledge: Arc<KnowledgeService>,
    pub documents: Arc<DocumentService>,
    pub secrets: Arc<SecretsService>,
    pub usage: Arc<UsageReporter>,
}

#[derive(Clone)]
pub(crate) struct ActivityDeps {
    pub services: Arc<SystemServices>,
    pub agent_name: String,
    pub workflow_type: String,
}

/// Map a runtime error onto the engine's retry semantics
///
/// Transient transport and server-side failures stay retryable; everything
/// else is terminal (the HTTP client already exhausted its own retries).
fn to_activity_error(e: XiansError) -> ActivityError {
    let retryable = match &e {
        XiansError::Http(HttpError::Transport(_)) | XiansError::Http(HttpError::Timeout) => true,
        XiansError::Http(HttpError::Status { status, .. }) => {
            *status >= 500 || *status == 408 || *status == 429
        }
        _ => false,
    };
    if retryable {
        ActivityError::retryable(e.to_string())
    } else {
        ActivityError::non_retryable(e.to_string())
    }
}

fn activity_runtime_context(deps: &ActivityDeps, actx: &ActivityContext) -> RuntimeContext {
    RuntimeContext {
        kind: ContextKind::Activity,
        tenant_id: actx.memo.tenant_id.clone(),
        agent_name: deps.agent_name.clone(),
        workflow_type: actx
            .workflow_type
            .clone()
            .unwrap_or_else(|| deps.workflow_type.clone()),
        workflow_id: actx.workflow_id.clone().unwrap_or_default(),
        run_id: None,
        registry: deps.services.registry.clone(),
    }
}

/// Register one system activity with ambient scoping and error mapping
fn register<F, Fut>(worker: &Arc<dyn EngineWorker>, name: &'static str, deps: ActivityDeps, f: F)
where
    F: Fn(Arc<SystemServices>, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, XiansError>> + Send + 'static,
{
    worker.register_activity(
        name,
        activity_handler(move |actx, input| {
            let runtime_ctx = activity_runtime_context(&deps, &actx);
            let fut = f(deps.services.clone(), input);
            async move {
                let tenant = runtime_ctx.tenant_id.clone();
                match Context::scope(runtime_ctx, fut).await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        error!(
                            activity = name,
                            tenant = tenant.as_deref().unwrap_or("<none>"),
                            workflow_id = actx.workflow_id.as_deref().unwrap_or("<none>"),
                            error = %e,
                            "system activity failed"
                        );
                        Err(to_activity_error(e))
                    }
                }
            }
        }),
    );
}

/// Register the full system activity set on a worker
pub(crate) fn register_system_activities(
    worker: &Arc<dyn EngineWorker>,
    services: Arc<SystemServices>,
    agent_name: &str,
    workflow_type: &str,
) {
    let deps = ActivityDeps {
        services,
        agent_name: agent_name.to_string(),
        workflow_type: workflow_type.to_string(),
    };

    register(worker, activity_names::MESSAGE_SEND, deps.clone(), |s, input| async move {
        let message: OutgoingMessage = serde_json::from_value(input)?;
        s.messaging.deliver(&message).await?;
        Ok(serde_json::Value::Null)
    });

    register(worker, activity_names::SCHEDULE_CREATE, deps.clone(), |s, input| async move {
        let request: CreateScheduleRequest = serde_json::from_value(input)?;
        create_if_not_exists(&s.engine, &request).await?;
        Ok(serde_json::Value::Null)
    });

    register(worker, activity_names::KNOWLEDGE_GET, deps.clone(), |s, input| async move {
        let request: KnowledgeRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.knowledge.get_impl(&request).await?)?)
    });
    register(worker, activity_names::KNOWLEDGE_UPDATE, deps.clone(), |s, input| async move {
        let request: KnowledgeRequest = serde_json::from_value(input)?;
        s.knowledge.update_impl(&request).await?;
        Ok(serde_json::Value::Null)
    });
    register(worker, activity_names::KNOWLEDGE_DELETE, deps.clone(), |s, input| async move {
        let request: KnowledgeRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.knowledge.delete_impl(&request).await?)?)
    });
    register(worker, activity_names::KNOWLEDGE_LIST, deps.clone(), |s, input| async move {
        let request: KnowledgeRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.knowledge.list_impl(&request).await?)?)
    });

    register(worker, activity_names::DOCUMENT_SAVE, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.save_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_GET, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.get_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_GET_BY_KEY, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.get_by_key_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_QUERY, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.query_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_UPDATE, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.update_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_DELETE, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.delete_impl(&request).await?)?)
    });
    register(worker, activity_names::DOCUMENT_DELETE_MANY, deps.clone(), |s, input| async move {
        let request: DocumentRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.documents.delete_many_impl(&request).await?)?)
    });

    register(worker, activity_names::SECRET_GET, deps.clone(), |s, input| async move {
        let request: SecretRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.secrets.get_impl(&request).await?)?)
    });
    register(worker, activity_names::SECRET_SET, deps.clone(), |s, input| async move {
        let request: SecretRequest = serde_json::from_value(input)?;
        s.secrets.set_impl(&request).await?;
        Ok(serde_json::Value::Null)
    });
    register(worker, activity_names::SECRET_DELETE, deps.clone(), |s, input| async move {
        let request: SecretRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.secrets.delete_impl(&request).await?)?)
    });
    register(worker, activity_names::SECRET_LIST, deps.clone(), |s, input| async move {
        let request: SecretRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(s.secrets.list_impl(&request).await?)?)
    });

    register(worker, activity_names::A2A_SIGNAL, deps.clone(), |s, input| async move {
        let envelope: A2AEnvelope = serde_json::from_value(input)?;
        s.engine
            .signal(&envelope.target_workflow_id, &envelope.name, &envelope.args)
            .await?;
        Ok(serde_json::Value::Null)
    });
    register(worker, activity_names::A2A_QUERY, deps.clone(), |s, input| async move {
        let envelope: A2AEnvelope = serde_json::from_value(input)?;
        s.engine
            .query(&envelope.target_workflow_id, &envelope.name, &envelope.args)
            .await
    });
    register(worker, activity_names::A2A_UPDATE, deps.clone(), |s, input| async move {
        let envelope: A2AEnvelope = serde_json::from_value(input)?;
        s.engine
            .update(&envelope.target_workflow_id, &envelope.name, &envelope.args)
            .await
    });
    register(worker, activity_names::A2A_CHAT, deps.clone(), |s, input| async move {
        let request: A2AChatRequest = serde_json::from_value(input)?;
        Ok(serde_json::to_value(run_isolated_chat(&s.engine, &request).await?)?)
    });

    register(worker, activity_names::USAGE_REPORT, deps, |s, input| async move {
        let record: UsageRecord = serde_json::from_value(input)?;
        s.usage.deliver(record);
        Ok(serde_json::Value::Null)
    });
}

/// Register the handler activity for one message workflow
///
/// The handler runs in an isolated activity. Handler errors never surface
/// to the engine: the wrapper logs, sends one best-effort error reply, and
/// completes the activity so user bugs are not retried.
pub(crate) fn register_handler_activity(
    worker: &Arc<dyn EngineWorker>,
    services: Arc<SystemServices>,
    agent_name: &str,
    workflow: &Arc<crate::agent::XiansWorkflow>,
) {
    let Some(handler) = workflow.handler.clone() else {
        return;
    };
    let deps = ActivityDeps {
        services: services.clone(),
        agent_name: agent_name.to_string(),
        workflow_type: workflow.workflow_type.clone(),
    };
    let messaging = services.messaging.clone();
    let activity = activity_names::handler(&workflow.workflow_type);

    worker.register_activity(
        &activity,
        activity_handler(move |actx, input| {
            let handler = handler.clone();
            let messaging = messaging.clone();
            let mut runtime_ctx = activity_runtime_context(&deps, &actx);
            async move {
                let input: HandlerActivityInput = serde_json::from_value(input)
                    .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

                // Direct dispatch (A2A chat) has no memo; the message is the
                // tenant source of truth there.
                if runtime_ctx.tenant_id.is_none() {
                    runtime_ctx.tenant_id = Some(input.message.tenant_id.clone());
                }

                let captured = Arc::new(parking_lot::Mutex::new(Vec::new()));
                let sink = if input.capture {
                    ReplySink::Capture(captured.clone())
                } else {
                    ReplySink::Deliver
                };
                let message_ctx =
                    UserMessageContext::new(input.message, messaging, sink);

                Context::scope(runtime_ctx, async {
                    match handler(message_ctx.clone()).await {
                        Ok(()) => {}
                        Err(e) => {
                            error!(
                                tenant = message_ctx.tenant_id(),
                                request_id = message_ctx.request_id(),
                                error = %e,
                                "message handler failed"
                            );
                            if let Err(reply_err) = message_ctx
                                .reply_error(format!("Error processing message: {e}"))
                                .await
                            {
                                error!(error = %reply_err, "error reply failed");
                            }
                        }
                    }
                })
                .await;

                let output = HandlerActivityOutput {
                    captured: captured.lock().clone(),
                };
                serde_json::to_value(output)
                    .map_err(|e| ActivityError::non_retryable(e.to_string()))
            }
        }),
    );
}

/// Run a target workflow's handler in an isolated activity on its queue and
/// return the captured replies
pub(crate) async fn run_isolated_chat(
    engine: &EngineClient,
    request: &A2AChatRequest,
) -> Result<HandlerActivityOutput, XiansError> {
    let input = HandlerActivityInput {
        message: request.message.clone(),
        capture: true,
    };
    let value = engine
        .engine()
        .execute_activity(
            &request.task_queue,
            &activity_names::handler(&request.workflow_type),
            serde_json::to_value(input)?,
            ActivityOptions::default(),
        )
        .await?;
    Ok(serde_json::from_value(value)?)
}
