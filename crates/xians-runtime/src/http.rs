//! Resilient backend HTTP client
//!
//! Bearer-auth JSON client shared by every capability service. Transient
//! failures (408, 429, 5xx, transport errors, timeouts) retry with
//! exponential backoff and jitter; other 4xx fail immediately. Every request
//! carries `X-Tenant-Id` equal to the tenant that will own the resulting
//! resource: the ambient context tenant when inside workflow/activity
//! execution, otherwise the agent's default tenant.

use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::Context;

/// Header carrying the owning tenant on every backend request
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// HTTP failure taxonomy
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status; body excerpt kept for diagnostics
    #[error("http status {status}: {body_excerpt}")]
    Status { status: u16, body_excerpt: String },

    /// 404, surfaced separately so services can map it to `None`/`false`
    #[error("resource not found")]
    NotFound,

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The request deadline elapsed
    #[error("request timed out")]
    Timeout,

    /// Response body did not match the expected shape
    #[error("response decode error: {0}")]
    Decode(String),
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Backend base URL
    pub base_url: String,

    /// Bearer token
    pub bearer_token: Option<String>,

    /// PEM identity (client certificate + key) for mTLS
    pub identity_pem: Option<Vec<u8>>,

    /// Tenant used when no ambient context is installed
    pub default_tenant: Option<String>,

    /// Maximum attempts per request (including the first)
    pub max_attempts: u32,

    /// Base backoff delay; doubles per retry with jitter
    pub base_delay: Duration,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Pooled connections kept per host
    pub pool_max_idle_per_host: usize,

    /// How long a pooled connection may sit idle
    pub pool_idle_timeout: Duration,

    /// How long a health probe result stays cached
    pub health_cache_ttl: Duration,

    /// Path probed by `health_check`
    pub health_path: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            bearer_token: None,
            identity_pem: None,
            default_tenant: None,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(90),
            health_cache_ttl: Duration::from_secs(30),
            health_path: "/api/agent/settings/flowserver".to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_default_tenant(mut self, tenant: Option<String>) -> Self {
        self.default_tenant = tenant;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

struct HealthSnapshot {
    healthy: bool,
    taken_at: Instant,
}

/// Shared backend client
///
/// One instance per platform; thread-safe and cheap to share behind `Arc`.
pub struct HttpClient {
    config: HttpClientConfig,
    inner: RwLock<reqwest::Client>,
    health: Mutex<Option<HealthSnapshot>>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        let inner = build_client(&config)?;
        Ok(Self {
            config,
            inner: RwLock::new(inner),
            health: Mutex::new(None),
        })
    }

    /// GET returning `None` on 404
    pub async fn get_json_opt<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, HttpError> {
        match self.request_json(Method::GET, path, query, None::<&()>).await {
            Ok(value) => Ok(Some(value)),
            Err(HttpError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        self.request_json(Method::GET, path, query, None::<&()>).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        self.request_json(Method::POST, path, &[], Some(body)).await
    }

    /// POST where the caller only cares about success
    pub async fn post_unit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), HttpError> {
        let _ = self
            .request(Method::POST, path, &[], Some(body))
            .await?
            .bytes()
            .await;
        Ok(())
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        self.request_json(Method::PUT, path, &[], Some(body)).await
    }

    /// DELETE returning `false` on 404
    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<bool, HttpError> {
        match self.request(Method::DELETE, path, query, None::<&()>).await {
            Ok(_) => Ok(true),
            Err(HttpError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn request_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let response = self.request(method, path, query, body).await?;
        response
            .json()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Issue a request with tenant stamping and retries
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<reqwest::Response, HttpError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let tenant = self.resolve_tenant();

        let mut attempt: u32 = 1;
        loop {
            let client = self.inner.read().clone();
            let mut request = client.request(method.clone(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(token) = &self.config.bearer_token {
                request = request.bearer_auth(token);
            }
            if let Some(tenant) = &tenant {
                request = request.header(TENANT_HEADER, tenant);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let err = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(HttpError::NotFound);
                    }
                    let body_excerpt = excerpt(response.text().await.unwrap_or_default());
                    let err = HttpError::Status {
                        status: status.as_u16(),
                        body_excerpt,
                    };
                    if !is_retryable_status(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() => HttpError::Timeout,
                Err(e) => HttpError::Transport(e.to_string()),
            };

            if attempt >= self.config.max_attempts {
                warn!(
                    %method,
                    url = %url,
                    attempt,
                    error = %err,
                    "backend request failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            debug!(
                %method,
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "backend request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Exponential backoff with up to 20% jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let jitter = rand::thread_rng().gen_range(0.0..base * 0.2);
        Duration::from_secs_f64(base + jitter)
    }

    /// The tenant stamped onto outbound requests
    ///
    /// Ambient context wins; the agent's default tenant is the fallback.
    /// With neither, the header is omitted.
    fn resolve_tenant(&self) -> Option<String> {
        if let Ok(ctx) = Context::current() {
            if let Some(tenant) = ctx.tenant_id {
                return Some(tenant);
            }
        }
        self.config.default_tenant.clone()
    }

    /// Probe backend health; the result is cached for `health_cache_ttl`
    pub async fn health_check(&self) -> bool {
        {
            let health = self.health.lock();
            if let Some(snapshot) = health.as_ref() {
                if snapshot.taken_at.elapsed() < self.config.health_cache_ttl {
                    return snapshot.healthy;
                }
            }
        }

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.health_path.trim_start_matches('/')
        );
        let client = self.inner.read().clone();
        let mut request = client.get(&url);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let healthy = matches!(request.send().await, Ok(r) if !r.status().is_server_error());

        *self.health.lock() = Some(HealthSnapshot {
            healthy,
            taken_at: Instant::now(),
        });
        healthy
    }

    /// Tear down pooled connections by rebuilding the inner client
    pub fn force_reconnect(&self) -> Result<(), HttpError> {
        let fresh = build_client(&self.config)?;
        *self.inner.write() = fresh;
        *self.health.lock() = None;
        Ok(())
    }
}

fn build_client(config: &HttpClientConfig) -> Result<reqwest::Client, HttpError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout);
    if let Some(pem) = &config.identity_pem {
        let identity = reqwest::Identity::from_pem(pem)
            .map_err(|e| HttpError::Transport(format!("invalid client identity: {e}")))?;
        builder = builder.identity(identity);
    }
    builder
        .build()
        .map_err(|e| HttpError::Transport(e.to_string()))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn excerpt(body: String) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpClient {
        HttpClient::new(
            HttpClientConfig::new(server.uri())
                .with_bearer_token("test-token")
                .with_default_tenant(Some("default-tenant".into()))
                .with_base_delay(Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_bearer_and_tenant_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/knowledge/latest"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header(TENANT_HEADER, "default-tenant"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let value: serde_json::Value = client
            .get_json("/api/agent/knowledge/latest", &[])
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_retries_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"n": 1})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let value: serde_json::Value = client.get_json("/flaky", &[]).await.unwrap();
        assert_eq!(value["n"], 1);
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .get_json::<serde_json::Value>("/bad", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_not_found_maps_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let value: Option<serde_json::Value> = client.get_json_opt("/missing", &[]).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_delete_maps_404_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(!client.delete("/gone", &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_result_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/settings/flowserver"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.health_check().await);
        // Second probe within the TTL hits the cache, not the server.
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_force_reconnect_clears_health_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/settings/flowserver"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.health_check().await);
        client.force_reconnect().unwrap();
        assert!(client.health_check().await);
    }
}
