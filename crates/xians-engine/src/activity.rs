//! Activity abstractions
//!
//! Activities are the units of I/O scheduled by workflows and executed by
//! workers. They may fail and be retried according to the retry policy of
//! the scheduling call.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::options::Memo;
use crate::retry::{duration_millis, RetryPolicy};

/// Error returned by an activity attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Whether the engine may retry the attempt
    pub retryable: bool,
}

impl ActivityError {
    /// A retryable failure (transient I/O, timeout, 5xx)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A terminal failure (bad input, business rule violation)
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

/// Options for a single activity invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Maximum time a single attempt may run
    #[serde(with = "duration_millis")]
    pub start_to_close: Duration,

    /// Retry policy across attempts
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    /// The capability-service defaults: 2 minute attempt timeout, 3 attempts
    /// starting at 5 seconds with coefficient 2.
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(120),
            retry: RetryPolicy::exponential()
                .with_max_attempts(3)
                .with_initial_interval(Duration::from_secs(5))
                .with_backoff_coefficient(2.0),
        }
    }
}

impl ActivityOptions {
    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Context handed to every activity attempt
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Registered activity type
    pub activity_type: String,

    /// Task queue the attempt runs on
    pub task_queue: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed by the invocation's retry policy
    pub max_attempts: u32,

    /// Owning workflow id, absent for direct client dispatch
    pub workflow_id: Option<String>,

    /// Owning workflow type, absent for direct client dispatch
    pub workflow_type: Option<String>,

    /// Tenancy memo of the owning workflow (empty for direct dispatch)
    pub memo: Memo,
}

impl ActivityContext {
    /// Whether this is the final attempt before the error surfaces
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Result of one activity attempt
pub type ActivityResult = Result<serde_json::Value, ActivityError>;

/// Type-erased activity handler registered on a worker
pub type ActivityHandler =
    Arc<dyn Fn(ActivityContext, serde_json::Value) -> BoxFuture<'static, ActivityResult> + Send + Sync>;

/// Wrap a plain async closure into an [`ActivityHandler`]
///
/// # Example
///
/// ```ignore
/// worker.register_activity("message.send", activity_handler(|ctx, input| async move {
///     deliver(input).await.map_err(|e| ActivityError::retryable(e.to_string()))
/// }));
/// ```
pub fn activity_handler<F, Fut>(f: F) -> ActivityHandler
where
    F: Fn(ActivityContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ActivityResult> + Send + 'static,
{
    Arc::new(move |ctx, input| Box::pin(f(ctx, input)))
}
