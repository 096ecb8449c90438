//! User messaging
//!
//! Reactive replies flow through the [`UserMessageContext`] handed to
//! message handlers; proactive sends go through [`MessagingService`]. Both
//! end up as a POST to the delivery endpoint, stamped with the owning
//! tenant, and both route through the context-aware executor so workflow
//! code gets an activity execution instead of direct I/O.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::Context;
use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::http::HttpClient;

/// Delivery endpoint on the backend
pub const MESSAGE_SEND_PATH: &str = "/api/agent/message/send";

/// Message flavor delivered to participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    Data,
    Error,
}

/// Wire body POSTed to the delivery endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Tenant that owns the conversation
    pub tenant_id: String,

    /// Receiving participant
    pub participant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Workflow type the message is sent as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,

    #[serde(default)]
    pub kind: MessageKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// An inbound user message as delivered to a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub tenant_id: String,
    pub participant_id: String,
    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Where replies from a handler go
#[derive(Clone)]
pub(crate) enum ReplySink {
    /// Deliver to the participant via the backend
    Deliver,

    /// Capture in memory; used for isolated A2A chat invocations
    Capture(Arc<Mutex<Vec<OutgoingMessage>>>),
}

/// The context handed to message handlers
///
/// Carries the inbound message plus reply primitives. `tenant_id` is derived
/// from the host workflow id and is read-only from the handler's
/// perspective.
#[derive(Clone)]
pub struct UserMessageContext {
    message: UserMessage,
    messaging: Arc<MessagingService>,
    sink: ReplySink,
}

impl UserMessageContext {
    pub(crate) fn new(
        message: UserMessage,
        messaging: Arc<MessagingService>,
        sink: ReplySink,
    ) -> Self {
        Self {
            message,
            messaging,
            sink,
        }
    }

    pub fn message(&self) -> &UserMessage {
        &self.message
    }

    pub fn tenant_id(&self) -> &str {
        &self.message.tenant_id
    }

    pub fn participant_id(&self) -> &str {
        &self.message.participant_id
    }

    pub fn request_id(&self) -> &str {
        &self.message.request_id
    }

    pub fn text(&self) -> Option<&str> {
        self.message.text.as_deref()
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.message.data.as_ref()
    }

    /// Reply with text; replies within one handler preserve call order
    pub async fn reply(&self, text: impl Into<String>) -> Result<(), XiansError> {
        self.reply_message(MessageKind::Chat, Some(text.into()), None).await
    }

    /// Reply with text plus a structured payload
    pub async fn reply_with_data(
        &self,
        text: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), XiansError> {
        self.reply_message(MessageKind::Chat, Some(text.into()), Some(data)).await
    }

    /// Reply with an error message
    pub async fn reply_error(&self, text: impl Into<String>) -> Result<(), XiansError> {
        self.reply_message(MessageKind::Error, Some(text.into()), None).await
    }

    async fn reply_message(
        &self,
        kind: MessageKind,
        text: Option<String>,
        data: Option<serde_json::Value>,
    ) -> Result<(), XiansError> {
        let outgoing = OutgoingMessage {
            tenant_id: self.message.tenant_id.clone(),
            participant_id: self.message.participant_id.clone(),
            thread_id: self.message.thread_id.clone(),
            request_id: Some(self.message.request_id.clone()),
            scope: self.message.scope.clone(),
            workflow_type: Context::workflow_type().ok(),
            kind,
            text,
            data,
        };
        match &self.sink {
            ReplySink::Capture(captured) => {
                captured.lock().push(outgoing);
                Ok(())
            }
            ReplySink::Deliver => self.messaging.send(outgoing).await,
        }
    }
}

/// Handler invoked per user message
pub type MessageHandler =
    Arc<dyn Fn(UserMessageContext) -> BoxFuture<'static, Result<(), XiansError>> + Send + Sync>;

/// Wrap a plain async closure into a [`MessageHandler`]
///
/// # Example
///
/// ```ignore
/// let handler = message_handler(|ctx| async move {
///     ctx.reply(format!("echo: {}", ctx.text().unwrap_or(""))).await
/// });
/// ```
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(UserMessageContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), XiansError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Proactive and reactive message delivery
pub struct MessagingService {
    http: Arc<HttpClient>,
}

impl MessagingService {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Deliver without context-aware routing; the `message.send` activity
    /// handler and the direct path both land here
    pub async fn deliver(&self, message: &OutgoingMessage) -> Result<(), XiansError> {
        self.http.post_unit(MESSAGE_SEND_PATH, message).await?;
        Ok(())
    }

    /// Send through the context-aware executor
    pub async fn send(&self, message: OutgoingMessage) -> Result<(), XiansError> {
        executor::execute(activity_names::MESSAGE_SEND, &message, async {
            self.deliver(&message).await?;
            Ok(serde_json::Value::Null)
        })
        .await
        .map(|_: serde_json::Value| ())
    }

    /// Proactively send a chat message to a participant
    ///
    /// Requires ambient workflow/activity context for tenant and workflow
    /// type; delivery failures are logged, never returned.
    pub async fn send_chat(
        &self,
        participant_id: impl Into<String>,
        text: impl Into<String>,
        data: Option<serde_json::Value>,
        scope: Option<String>,
    ) -> Result<(), XiansError> {
        let workflow_type = Context::workflow_type().map_err(|_| XiansError::NoAmbientContext)?;
        self.send_as_internal(workflow_type, participant_id.into(), MessageKind::Chat, Some(text.into()), data, scope)
            .await
    }

    /// Proactively send a data-only message to a participant
    pub async fn send_data(
        &self,
        participant_id: impl Into<String>,
        data: serde_json::Value,
        scope: Option<String>,
    ) -> Result<(), XiansError> {
        let workflow_type = Context::workflow_type().map_err(|_| XiansError::NoAmbientContext)?;
        self.send_as_internal(workflow_type, participant_id.into(), MessageKind::Data, None, Some(data), scope)
            .await
    }

    /// Send as another workflow type of the same agent
    ///
    /// Impersonating a different agent's workflow type is rejected.
    pub async fn send_as(
        &self,
        workflow_type: impl Into<String>,
        participant_id: impl Into<String>,
        text: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Result<(), XiansError> {
        let workflow_type = workflow_type.into();
        let agent_name = Context::agent_name().map_err(|_| XiansError::NoAmbientContext)?;
        if workflow_type.split(':').next() != Some(agent_name.as_str()) {
            return Err(XiansError::Configuration(format!(
                "send_as is restricted to workflows of agent {agent_name}, got {workflow_type}"
            )));
        }
        self.send_as_internal(
            workflow_type,
            participant_id.into(),
            MessageKind::Chat,
            Some(text.into()),
            data,
            None,
        )
        .await
    }

    async fn send_as_internal(
        &self,
        workflow_type: String,
        participant_id: String,
        kind: MessageKind,
        text: Option<String>,
        data: Option<serde_json::Value>,
        scope: Option<String>,
    ) -> Result<(), XiansError> {
        let tenant_id = Context::tenant_id().map_err(|_| XiansError::NoAmbientContext)?;
        let message = OutgoingMessage {
            tenant_id,
            participant_id,
            thread_id: None,
            request_id: None,
            scope,
            workflow_type: Some(workflow_type),
            kind,
            text,
            data,
        };
        if let Err(e) = self.send(message).await {
            warn!(error = %e, "proactive message delivery failed");
        }
        Ok(())
    }
}
