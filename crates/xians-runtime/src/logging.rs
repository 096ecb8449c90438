//! Batched server log upload
//!
//! A `tracing` layer feeds a bounded queue; an uploader task flushes
//! batches of up to `batch_size` entries or every `interval`, whichever
//! comes first. Failed batches are requeued a bounded number of times, and
//! the oldest entries are dropped when the queue is full. Shutdown flushes
//! what remains within a grace period.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::{warn, Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::context::Context;
use crate::http::HttpClient;
use crate::options::XiansOptions;

/// One uploaded log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Uploader tuning
#[derive(Debug, Clone)]
pub struct LogUploadConfig {
    /// Entries per upload batch
    pub batch_size: usize,

    /// Flush cadence when the batch does not fill up
    pub interval: Duration,

    /// Bound on buffered entries; oldest are dropped beyond this
    pub capacity: usize,

    /// How many times a failed batch is requeued before being dropped
    pub max_batch_retries: u32,

    /// Grace period for the final flush on shutdown
    pub shutdown_grace: Duration,
}

impl Default for LogUploadConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(60),
            capacity: 10_000,
            max_batch_retries: 3,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// `tracing` layer forwarding events at or above a level to the uploader
pub struct ServerLogLayer {
    tx: mpsc::Sender<LogEntry>,
    level: Level,
}

impl ServerLogLayer {
    /// Returns the layer and the receiving end for a [`LogUploader`]
    pub fn new(level: Level, capacity: usize) -> (Self, mpsc::Receiver<LogEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, level }, rx)
    }
}

impl<S: Subscriber> Layer<S> for ServerLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        if *event.metadata().level() > self.level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let (tenant_id, workflow_id) = Context::current()
            .map(|c| (c.tenant_id, Some(c.workflow_id)))
            .unwrap_or((None, None));

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.into_message(),
            tenant_id,
            workflow_id,
        };

        // Dropping on a full queue is intentional: logging must not block.
        let _ = self.tx.try_send(entry);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn into_message(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {fields}", self.message)
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Background task draining the layer's queue into the backend
pub struct LogUploader {
    rx: mpsc::Receiver<LogEntry>,
    http: Arc<HttpClient>,
    config: LogUploadConfig,
    pending: VecDeque<LogEntry>,
    batch_retries: u32,
}

#[derive(Serialize)]
struct LogBatch<'a> {
    entries: &'a [LogEntry],
}

impl LogUploader {
    pub fn new(rx: mpsc::Receiver<LogEntry>, http: Arc<HttpClient>, config: LogUploadConfig) -> Self {
        Self {
            rx,
            http,
            config,
            pending: VecDeque::new(),
            batch_retries: 0,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                entry = self.rx.recv() => {
                    match entry {
                        Some(entry) => {
                            self.buffer(entry);
                            if self.pending.len() >= self.config.batch_size {
                                self.flush_one_batch().await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush_one_batch().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain_with_grace().await;
    }

    fn buffer(&mut self, entry: LogEntry) {
        if self.pending.len() >= self.config.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(entry);
    }

    async fn flush_one_batch(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let take = self.pending.len().min(self.config.batch_size);
        let batch: Vec<LogEntry> = self.pending.drain(..take).collect();

        match self
            .http
            .post_unit("/api/agent/logs/upload", &LogBatch { entries: &batch })
            .await
        {
            Ok(()) => {
                self.batch_retries = 0;
            }
            Err(e) => {
                self.batch_retries += 1;
                if self.batch_retries <= self.config.max_batch_retries {
                    // Requeue at the front so order is preserved.
                    for entry in batch.into_iter().rev() {
                        self.pending.push_front(entry);
                    }
                    while self.pending.len() > self.config.capacity {
                        self.pending.pop_front();
                    }
                    warn!(error = %e, retries = self.batch_retries, "log upload failed, batch requeued");
                } else {
                    warn!(error = %e, dropped = batch.len(), "log upload failed, batch dropped");
                    self.batch_retries = 0;
                }
            }
        }
    }

    /// Final flush, bounded by the shutdown grace period
    async fn drain_with_grace(&mut self) {
        while let Ok(entry) = self.rx.try_recv() {
            self.buffer(entry);
        }
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while !self.pending.is_empty() && tokio::time::Instant::now() < deadline {
            let before = self.pending.len();
            self.flush_one_batch().await;
            if self.pending.len() >= before {
                // Not making progress; stop burning the grace period.
                break;
            }
        }
    }
}

/// Handle over the logging pipeline
pub struct LoggingHandle {
    shutdown: watch::Sender<bool>,
    uploader: JoinHandle<()>,
}

impl LoggingHandle {
    /// Flush remaining entries and stop the uploader
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.uploader.await;
    }
}

/// Install the console + server logging pipeline
///
/// Console output honors `console_log_level` as an `EnvFilter` directive;
/// the server layer forwards entries at `server_log_level` and above.
/// Returns `None` when a global subscriber is already installed.
pub fn init_logging(
    options: &XiansOptions,
    http: Arc<HttpClient>,
    config: LogUploadConfig,
) -> Option<LoggingHandle> {
    let server_level = Level::from_str(&options.server_log_level).unwrap_or(Level::WARN);
    let (layer, rx) = ServerLogLayer::new(server_level, config.capacity);

    let console_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(&options.console_log_level);

    let installed = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(layer)
        .try_init()
        .is_ok();
    if !installed {
        return None;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let uploader = tokio::spawn(LogUploader::new(rx, http, config).run(shutdown_rx));
    Some(LoggingHandle {
        shutdown: shutdown_tx,
        uploader,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::http::HttpClientConfig;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: "WARN".into(),
            target: "test".into(),
            message: message.into(),
            tenant_id: None,
            workflow_id: None,
        }
    }

    async fn uploader_for(server: &MockServer, config: LogUploadConfig) -> (mpsc::Sender<LogEntry>, JoinHandle<()>, watch::Sender<bool>) {
        let http = Arc::new(
            HttpClient::new(
                HttpClientConfig::new(server.uri())
                    .with_base_delay(Duration::from_millis(1))
                    .with_max_attempts(1),
            )
            .unwrap(),
        );
        let (tx, rx) = mpsc::channel(1000);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(LogUploader::new(rx, http, config).run(shutdown_rx));
        (tx, handle, shutdown_tx)
    }

    #[tokio::test]
    async fn test_batch_flush_on_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/logs/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1..)
            .mount(&server)
            .await;

        let config = LogUploadConfig {
            batch_size: 3,
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (tx, handle, shutdown) = uploader_for(&server, config).await;

        for i in 0..3 {
            tx.send(entry(&format!("m{i}"))).await.unwrap();
        }
        // Give the uploader a moment to flush the full batch.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = shutdown.send(true);
        let _ = handle.await;
        let requests = server.received_requests().await.unwrap();
        assert!(!requests.is_empty());
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remainder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/logs/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = LogUploadConfig {
            batch_size: 100,
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (tx, handle, shutdown) = uploader_for(&server, config).await;

        tx.send(entry("tail")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.send(true);
        let _ = handle.await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn test_layer_filters_by_level() {
        let (layer, mut rx) = ServerLogLayer::new(Level::WARN, 16);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("too quiet");
            tracing::warn!(code = 7, "loud enough");
        });

        let entry = rx.try_recv().unwrap();
        assert!(entry.message.contains("loud enough"));
        assert!(entry.message.contains("code=7"));
        assert!(rx.try_recv().is_err());
    }
}
