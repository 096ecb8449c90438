//! Knowledge service
//!
//! Named knowledge entries scoped by tenant + agent, with a TTL cache on
//! reads and invalidation on writes. The provider is swappable: HTTP against
//! the backend, or in-memory for local mode.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::http::HttpClient;
use crate::options::CacheEntryOptions;

use super::cache::TtlCache;
use super::scope::ServiceScope;

/// A knowledge entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Knowledge {
    pub name: String,
    pub content: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    pub agent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Storage backend for knowledge entries
#[async_trait::async_trait]
pub trait KnowledgeProvider: Send + Sync {
    async fn get(
        &self,
        scope: &ServiceScope,
        name: &str,
    ) -> Result<Option<Knowledge>, XiansError>;

    async fn upsert(&self, scope: &ServiceScope, knowledge: Knowledge)
        -> Result<(), XiansError>;

    async fn delete(&self, scope: &ServiceScope, name: &str) -> Result<bool, XiansError>;

    async fn list(&self, scope: &ServiceScope) -> Result<Vec<Knowledge>, XiansError>;
}

/// HTTP provider against the backend knowledge API
pub struct ServerKnowledgeProvider {
    http: Arc<HttpClient>,
}

impl ServerKnowledgeProvider {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl KnowledgeProvider for ServerKnowledgeProvider {
    async fn get(
        &self,
        scope: &ServiceScope,
        name: &str,
    ) -> Result<Option<Knowledge>, XiansError> {
        Ok(self
            .http
            .get_json_opt(
                "/api/agent/knowledge/latest",
                &[("name", name), ("agent", &scope.agent)],
            )
            .await?)
    }

    async fn upsert(
        &self,
        _scope: &ServiceScope,
        knowledge: Knowledge,
    ) -> Result<(), XiansError> {
        self.http.post_unit("/api/agent/knowledge", &knowledge).await?;
        Ok(())
    }

    async fn delete(&self, scope: &ServiceScope, name: &str) -> Result<bool, XiansError> {
        Ok(self
            .http
            .delete(
                "/api/agent/knowledge",
                &[("name", name), ("agent", &scope.agent)],
            )
            .await?)
    }

    async fn list(&self, scope: &ServiceScope) -> Result<Vec<Knowledge>, XiansError> {
        Ok(self
            .http
            .get_json("/api/agent/knowledge/list", &[("agent", &scope.agent)])
            .await?)
    }
}

/// In-memory provider for local mode; per-process, not persisted
#[derive(Default)]
pub struct LocalKnowledgeProvider {
    entries: dashmap::DashMap<(String, String, String), Knowledge>,
}

impl LocalKnowledgeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: &ServiceScope, name: &str) -> (String, String, String) {
        (scope.tenant.clone(), scope.agent.clone(), name.to_string())
    }
}

#[async_trait::async_trait]
impl KnowledgeProvider for LocalKnowledgeProvider {
    async fn get(
        &self,
        scope: &ServiceScope,
        name: &str,
    ) -> Result<Option<Knowledge>, XiansError> {
        Ok(self.entries.get(&Self::key(scope, name)).map(|e| e.clone()))
    }

    async fn upsert(&self, scope: &ServiceScope, knowledge: Knowledge) -> Result<(), XiansError> {
        self.entries
            .insert(Self::key(scope, &knowledge.name), knowledge);
        Ok(())
    }

    async fn delete(&self, scope: &ServiceScope, name: &str) -> Result<bool, XiansError> {
        Ok(self.entries.remove(&Self::key(scope, name)).is_some())
    }

    async fn list(&self, scope: &ServiceScope) -> Result<Vec<Knowledge>, XiansError> {
        let mut entries: Vec<Knowledge> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == scope.tenant && e.key().1 == scope.agent)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Request payload carried by the knowledge system activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRequest {
    pub scope: ServiceScope,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Knowledge facade
pub struct KnowledgeService {
    provider: Arc<dyn KnowledgeProvider>,
    cache: TtlCache<(String, String, String), Option<Knowledge>>,
}

impl KnowledgeService {
    pub fn new(provider: Arc<dyn KnowledgeProvider>, cache_options: &CacheEntryOptions) -> Self {
        Self {
            provider,
            cache: TtlCache::new(cache_options),
        }
    }

    /// Get a knowledge entry by name, scoped to the ambient tenant + agent
    pub async fn get(&self, name: &str) -> Result<Option<Knowledge>, XiansError> {
        let scope = ServiceScope::ambient()?;
        let request = KnowledgeRequest {
            scope,
            name: name.to_string(),
            content: None,
            content_type: None,
        };
        executor::execute(activity_names::KNOWLEDGE_GET, &request, self.get_impl(&request)).await
    }

    /// Create or replace a knowledge entry
    pub async fn update(
        &self,
        name: &str,
        content: impl Into<String>,
        content_type: Option<String>,
    ) -> Result<(), XiansError> {
        let scope = ServiceScope::ambient()?;
        let request = KnowledgeRequest {
            scope,
            name: name.to_string(),
            content: Some(content.into()),
            content_type,
        };
        executor::execute(activity_names::KNOWLEDGE_UPDATE, &request, async {
            self.update_impl(&request).await?;
            Ok(serde_json::Value::Null)
        })
        .await
        .map(|_: serde_json::Value| ())
    }

    /// Delete a knowledge entry; `false` when it did not exist
    pub async fn delete(&self, name: &str) -> Result<bool, XiansError> {
        let scope = ServiceScope::ambient()?;
        let request = KnowledgeRequest {
            scope,
            name: name.to_string(),
            content: None,
            content_type: None,
        };
        executor::execute(
            activity_names::KNOWLEDGE_DELETE,
            &request,
            self.delete_impl(&request),
        )
        .await
    }

    /// List this agent's knowledge entries
    pub async fn list(&self) -> Result<Vec<Knowledge>, XiansError> {
        let scope = ServiceScope::ambient()?;
        let request = KnowledgeRequest {
            scope,
            name: String::new(),
            content: None,
            content_type: None,
        };
        executor::execute(
            activity_names::KNOWLEDGE_LIST,
            &request,
            self.list_impl(&request),
        )
        .await
    }

    // Direct-path implementations, shared with the system activity handlers.

    pub(crate) async fn get_impl(
        &self,
        request: &KnowledgeRequest,
    ) -> Result<Option<Knowledge>, XiansError> {
        let key = cache_key(request);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let value = self.provider.get(&request.scope, &request.name).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    pub(crate) async fn update_impl(&self, request: &KnowledgeRequest) -> Result<(), XiansError> {
        let content = request.content.clone().ok_or_else(|| {
            XiansError::Configuration("knowledge update requires content".into())
        })?;
        let knowledge = Knowledge {
            name: request.name.clone(),
            content,
            content_type: request.content_type.clone(),
            agent: request.scope.agent.clone(),
            tenant_id: Some(request.scope.tenant.clone()),
        };
        self.provider.upsert(&request.scope, knowledge).await?;
        self.cache.invalidate(&cache_key(request));
        Ok(())
    }

    pub(crate) async fn delete_impl(&self, request: &KnowledgeRequest) -> Result<bool, XiansError> {
        let deleted = self.provider.delete(&request.scope, &request.name).await?;
        self.cache.invalidate(&cache_key(request));
        Ok(deleted)
    }

    pub(crate) async fn list_impl(
        &self,
        request: &KnowledgeRequest,
    ) -> Result<Vec<Knowledge>, XiansError> {
        self.provider.list(&request.scope).await
    }
}

fn cache_key(request: &KnowledgeRequest) -> (String, String, String) {
    (
        request.scope.tenant.clone(),
        request.scope.agent.clone(),
        request.name.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scope() -> ServiceScope {
        ServiceScope {
            tenant: "acme".into(),
            agent: "A".into(),
        }
    }

    fn request(name: &str) -> KnowledgeRequest {
        KnowledgeRequest {
            scope: scope(),
            name: name.into(),
            content: None,
            content_type: None,
        }
    }

    fn service() -> KnowledgeService {
        KnowledgeService::new(
            Arc::new(LocalKnowledgeProvider::new()),
            &CacheEntryOptions {
                enabled: true,
                ttl: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test]
    async fn test_local_round_trip() {
        let service = service();
        let mut update = request("greeting");
        update.content = Some("hello".into());

        service.update_impl(&update).await.unwrap();
        let entry = service.get_impl(&request("greeting")).await.unwrap().unwrap();
        assert_eq!(entry.content, "hello");
        assert_eq!(entry.agent, "A");
        assert_eq!(entry.tenant_id.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let service = service();
        let mut update = request("doc");
        update.content = Some("v1".into());
        service.update_impl(&update).await.unwrap();

        // Prime the cache.
        assert!(service.get_impl(&request("doc")).await.unwrap().is_some());

        update.content = Some("v2".into());
        service.update_impl(&update).await.unwrap();
        let entry = service.get_impl(&request("doc")).await.unwrap().unwrap();
        assert_eq!(entry.content, "v2");
    }

    #[tokio::test]
    async fn test_delete_returns_existence() {
        let service = service();
        let mut update = request("gone");
        update.content = Some("x".into());
        service.update_impl(&update).await.unwrap();

        assert!(service.delete_impl(&request("gone")).await.unwrap());
        assert!(!service.delete_impl(&request("gone")).await.unwrap());
        assert!(service.get_impl(&request("gone")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_tenant_and_agent_scoped() {
        let provider = Arc::new(LocalKnowledgeProvider::new());
        let service = KnowledgeService::new(provider.clone(), &CacheEntryOptions::default());

        let mut mine = request("mine");
        mine.content = Some("1".into());
        service.update_impl(&mine).await.unwrap();

        let foreign = KnowledgeRequest {
            scope: ServiceScope {
                tenant: "contoso".into(),
                agent: "A".into(),
            },
            name: "theirs".into(),
            content: Some("2".into()),
            content_type: None,
        };
        service.update_impl(&foreign).await.unwrap();

        let listed = service.list_impl(&request("")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "mine");
    }

    #[tokio::test]
    async fn test_ambient_scope_required() {
        let service = service();
        let err = service.get("anything").await.unwrap_err();
        assert!(matches!(err, XiansError::NoAmbientContext));
    }
}
