//! Document service
//!
//! Structured document CRUD scoped by tenant + agent. Documents may expire
//! via TTL; `use_key_as_identifier` makes `(type, key)` the primary key so
//! saves upsert instead of duplicating.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::http::HttpClient;

use super::scope::ServiceScope;

/// A stored document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub doc_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub content: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(doc_type: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            doc_type: doc_type.into(),
            key: None,
            content,
            metadata: None,
            created_at: None,
            updated_at: None,
            expires_at: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Options applied when saving a document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocumentOptions {
    /// Lifetime after which the document expires
    #[serde(
        default,
        with = "xians_engine::retry::duration_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,

    /// Treat `(type, key)` as the primary key: saving replaces the existing
    /// document with the same pair
    #[serde(default)]
    pub use_key_as_identifier: bool,
}

/// Filter for document queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    #[serde(rename = "type")]
    pub doc_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn by_type(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            key: None,
            limit: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage backend for documents
#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn save(
        &self,
        scope: &ServiceScope,
        document: Document,
        options: &SaveDocumentOptions,
    ) -> Result<Document, XiansError>;

    async fn get(&self, scope: &ServiceScope, id: &str) -> Result<Option<Document>, XiansError>;

    async fn get_by_key(
        &self,
        scope: &ServiceScope,
        doc_type: &str,
        key: &str,
    ) -> Result<Option<Document>, XiansError>;

    async fn query(
        &self,
        scope: &ServiceScope,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, XiansError>;

    async fn update(&self, scope: &ServiceScope, document: Document)
        -> Result<bool, XiansError>;

    async fn delete(&self, scope: &ServiceScope, id: &str) -> Result<bool, XiansError>;
}

/// HTTP provider against the backend document API
pub struct ServerDocumentProvider {
    http: Arc<HttpClient>,
}

impl ServerDocumentProvider {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl DocumentProvider for ServerDocumentProvider {
    async fn save(
        &self,
        scope: &ServiceScope,
        document: Document,
        options: &SaveDocumentOptions,
    ) -> Result<Document, XiansError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SaveBody<'a> {
            agent: &'a str,
            document: &'a Document,
            options: &'a SaveDocumentOptions,
        }
        Ok(self
            .http
            .post_json(
                "/api/agent/documents",
                &SaveBody {
                    agent: &scope.agent,
                    document: &document,
                    options,
                },
            )
            .await?)
    }

    async fn get(&self, scope: &ServiceScope, id: &str) -> Result<Option<Document>, XiansError> {
        Ok(self
            .http
            .get_json_opt("/api/agent/documents", &[("id", id), ("agent", &scope.agent)])
            .await?)
    }

    async fn get_by_key(
        &self,
        scope: &ServiceScope,
        doc_type: &str,
        key: &str,
    ) -> Result<Option<Document>, XiansError> {
        Ok(self
            .http
            .get_json_opt(
                "/api/agent/documents",
                &[("type", doc_type), ("key", key), ("agent", &scope.agent)],
            )
            .await?)
    }

    async fn query(
        &self,
        scope: &ServiceScope,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, XiansError> {
        let limit = filter.limit.map(|l| l.to_string());
        let mut query: Vec<(&str, &str)> =
            vec![("type", filter.doc_type.as_str()), ("agent", &scope.agent)];
        if let Some(key) = &filter.key {
            query.push(("key", key));
        }
        if let Some(limit) = &limit {
            query.push(("limit", limit));
        }
        Ok(self.http.get_json("/api/agent/documents", &query).await?)
    }

    async fn update(
        &self,
        scope: &ServiceScope,
        document: Document,
    ) -> Result<bool, XiansError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct UpdateBody<'a> {
            agent: &'a str,
            document: &'a Document,
        }
        match self
            .http
            .put_json::<_, serde_json::Value>(
                "/api/agent/documents",
                &UpdateBody {
                    agent: &scope.agent,
                    document: &document,
                },
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(crate::http::HttpError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, scope: &ServiceScope, id: &str) -> Result<bool, XiansError> {
        Ok(self
            .http
            .delete("/api/agent/documents", &[("id", id), ("agent", &scope.agent)])
            .await?)
    }
}

/// In-memory provider for local mode
#[derive(Default)]
pub struct LocalDocumentProvider {
    documents: dashmap::DashMap<(String, String, String), Document>,
}

impl LocalDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: &ServiceScope, id: &str) -> (String, String, String) {
        (scope.tenant.clone(), scope.agent.clone(), id.to_string())
    }
}

#[async_trait::async_trait]
impl DocumentProvider for LocalDocumentProvider {
    async fn save(
        &self,
        scope: &ServiceScope,
        mut document: Document,
        options: &SaveDocumentOptions,
    ) -> Result<Document, XiansError> {
        let now = Utc::now();
        if options.use_key_as_identifier {
            let key = document.key.clone().ok_or_else(|| {
                XiansError::Configuration(
                    "use_key_as_identifier requires the document key".into(),
                )
            })?;
            if let Some(existing) = self
                .get_by_key(scope, &document.doc_type, &key)
                .await?
            {
                document.id = existing.id;
                document.created_at = existing.created_at;
            }
        }
        if document.id.is_empty() {
            document.id = Uuid::now_v7().to_string();
        }
        if document.created_at.is_none() {
            document.created_at = Some(now);
        }
        document.updated_at = Some(now);
        if let Some(ttl) = options.ttl {
            document.expires_at = Some(now + chrono::Duration::from_std(ttl).unwrap_or_default());
        }

        self.documents
            .insert(Self::key(scope, &document.id), document.clone());
        Ok(document)
    }

    async fn get(&self, scope: &ServiceScope, id: &str) -> Result<Option<Document>, XiansError> {
        let now = Utc::now();
        let found = self
            .documents
            .get(&Self::key(scope, id))
            .map(|doc| (doc.is_expired(now), doc.clone()));
        match found {
            Some((false, doc)) => Ok(Some(doc)),
            Some((true, _)) => {
                self.documents.remove(&Self::key(scope, id));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn get_by_key(
        &self,
        scope: &ServiceScope,
        doc_type: &str,
        key: &str,
    ) -> Result<Option<Document>, XiansError> {
        let now = Utc::now();
        Ok(self
            .documents
            .iter()
            .filter(|e| e.key().0 == scope.tenant && e.key().1 == scope.agent)
            .map(|e| e.value().clone())
            .find(|d| {
                d.doc_type == doc_type && d.key.as_deref() == Some(key) && !d.is_expired(now)
            }))
    }

    async fn query(
        &self,
        scope: &ServiceScope,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, XiansError> {
        let now = Utc::now();
        let mut documents: Vec<Document> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == scope.tenant && e.key().1 == scope.agent)
            .map(|e| e.value().clone())
            .filter(|d| d.doc_type == filter.doc_type && !d.is_expired(now))
            .filter(|d| {
                filter
                    .key
                    .as_deref()
                    .map(|k| d.key.as_deref() == Some(k))
                    .unwrap_or(true)
            })
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = filter.limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn update(
        &self,
        scope: &ServiceScope,
        mut document: Document,
    ) -> Result<bool, XiansError> {
        let key = Self::key(scope, &document.id);
        if !self.documents.contains_key(&key) {
            return Ok(false);
        }
        document.updated_at = Some(Utc::now());
        self.documents.insert(key, document);
        Ok(true)
    }

    async fn delete(&self, scope: &ServiceScope, id: &str) -> Result<bool, XiansError> {
        Ok(self.documents.remove(&Self::key(scope, id)).is_some())
    }
}

/// Request payload carried by the document system activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub scope: ServiceScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SaveDocumentOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<DocumentFilter>,
}

impl DocumentRequest {
    fn scoped(scope: ServiceScope) -> Self {
        Self {
            scope,
            document: None,
            options: None,
            id: None,
            ids: Vec::new(),
            doc_type: None,
            key: None,
            filter: None,
        }
    }
}

/// Document facade
pub struct DocumentService {
    provider: Arc<dyn DocumentProvider>,
}

impl DocumentService {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self { provider }
    }

    pub async fn save(
        &self,
        document: Document,
        options: Option<SaveDocumentOptions>,
    ) -> Result<Document, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.document = Some(document);
        request.options = options;
        executor::execute(activity_names::DOCUMENT_SAVE, &request, self.save_impl(&request)).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.id = Some(id.to_string());
        executor::execute(activity_names::DOCUMENT_GET, &request, self.get_impl(&request)).await
    }

    pub async fn get_by_key(
        &self,
        doc_type: &str,
        key: &str,
    ) -> Result<Option<Document>, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.doc_type = Some(doc_type.to_string());
        request.key = Some(key.to_string());
        executor::execute(
            activity_names::DOCUMENT_GET_BY_KEY,
            &request,
            self.get_by_key_impl(&request),
        )
        .await
    }

    pub async fn query(&self, filter: DocumentFilter) -> Result<Vec<Document>, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.filter = Some(filter);
        executor::execute(activity_names::DOCUMENT_QUERY, &request, self.query_impl(&request))
            .await
    }

    pub async fn update(&self, document: Document) -> Result<bool, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.document = Some(document);
        executor::execute(activity_names::DOCUMENT_UPDATE, &request, self.update_impl(&request))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.id = Some(id.to_string());
        executor::execute(activity_names::DOCUMENT_DELETE, &request, self.delete_impl(&request))
            .await
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<usize, XiansError> {
        let mut request = DocumentRequest::scoped(ServiceScope::ambient()?);
        request.ids = ids.to_vec();
        executor::execute(
            activity_names::DOCUMENT_DELETE_MANY,
            &request,
            self.delete_many_impl(&request),
        )
        .await
    }

    pub async fn exists(&self, id: &str) -> Result<bool, XiansError> {
        Ok(self.get(id).await?.is_some())
    }

    // Direct-path implementations, shared with the system activity handlers.

    pub(crate) async fn save_impl(&self, request: &DocumentRequest) -> Result<Document, XiansError> {
        let document = request
            .document
            .clone()
            .ok_or_else(|| XiansError::Configuration("save requires a document".into()))?;
        self.provider
            .save(
                &request.scope,
                document,
                &request.options.clone().unwrap_or_default(),
            )
            .await
    }

    pub(crate) async fn get_impl(
        &self,
        request: &DocumentRequest,
    ) -> Result<Option<Document>, XiansError> {
        let id = request
            .id
            .as_deref()
            .ok_or_else(|| XiansError::Configuration("get requires an id".into()))?;
        self.provider.get(&request.scope, id).await
    }

    pub(crate) async fn get_by_key_impl(
        &self,
        request: &DocumentRequest,
    ) -> Result<Option<Document>, XiansError> {
        let doc_type = request
            .doc_type
            .as_deref()
            .ok_or_else(|| XiansError::Configuration("get_by_key requires a type".into()))?;
        let key = request
            .key
            .as_deref()
            .ok_or_else(|| XiansError::Configuration("get_by_key requires a key".into()))?;
        self.provider.get_by_key(&request.scope, doc_type, key).await
    }

    pub(crate) async fn query_impl(
        &self,
        request: &DocumentRequest,
    ) -> Result<Vec<Document>, XiansError> {
        let filter = request
            .filter
            .clone()
            .ok_or_else(|| XiansError::Configuration("query requires a filter".into()))?;
        self.provider.query(&request.scope, &filter).await
    }

    pub(crate) async fn update_impl(&self, request: &DocumentRequest) -> Result<bool, XiansError> {
        let document = request
            .document
            .clone()
            .ok_or_else(|| XiansError::Configuration("update requires a document".into()))?;
        self.provider.update(&request.scope, document).await
    }

    pub(crate) async fn delete_impl(&self, request: &DocumentRequest) -> Result<bool, XiansError> {
        let id = request
            .id
            .as_deref()
            .ok_or_else(|| XiansError::Configuration("delete requires an id".into()))?;
        self.provider.delete(&request.scope, id).await
    }

    pub(crate) async fn delete_many_impl(
        &self,
        request: &DocumentRequest,
    ) -> Result<usize, XiansError> {
        let mut deleted = 0;
        for id in &request.ids {
            if self.provider.delete(&request.scope, id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ServiceScope {
        ServiceScope::new("acme", "A")
    }

    fn provider() -> LocalDocumentProvider {
        LocalDocumentProvider::new()
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_timestamps() {
        let provider = provider();
        let saved = provider
            .save(
                &scope(),
                Document::new("note", serde_json::json!({"body": "hi"})),
                &SaveDocumentOptions::default(),
            )
            .await
            .unwrap();

        assert!(!saved.id.is_empty());
        assert!(saved.created_at.is_some());
        assert!(saved.updated_at.is_some());

        let loaded = provider.get(&scope(), &saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.content["body"], "hi");
    }

    #[tokio::test]
    async fn test_key_as_identifier_upserts() {
        let provider = provider();
        let options = SaveDocumentOptions {
            ttl: None,
            use_key_as_identifier: true,
        };

        let first = provider
            .save(
                &scope(),
                Document::new("profile", serde_json::json!({"v": 1})).with_key("u1"),
                &options,
            )
            .await
            .unwrap();
        let second = provider
            .save(
                &scope(),
                Document::new("profile", serde_json::json!({"v": 2})).with_key("u1"),
                &options,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let loaded = provider
            .get_by_key(&scope(), "profile", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.content["v"], 2);
    }

    #[tokio::test]
    async fn test_expired_documents_are_invisible() {
        let provider = provider();
        let saved = provider
            .save(
                &scope(),
                Document::new("ephemeral", serde_json::json!({})),
                &SaveDocumentOptions {
                    ttl: Some(Duration::ZERO),
                    use_key_as_identifier: false,
                },
            )
            .await
            .unwrap();

        assert!(provider.get(&scope(), &saved.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_filters_and_limits() {
        let provider = provider();
        for i in 0..3 {
            provider
                .save(
                    &scope(),
                    Document::new("note", serde_json::json!({"i": i})),
                    &SaveDocumentOptions::default(),
                )
                .await
                .unwrap();
        }
        provider
            .save(
                &scope(),
                Document::new("other", serde_json::json!({})),
                &SaveDocumentOptions::default(),
            )
            .await
            .unwrap();

        let notes = provider
            .query(&scope(), &DocumentFilter::by_type("note"))
            .await
            .unwrap();
        assert_eq!(notes.len(), 3);

        let limited = provider
            .query(&scope(), &DocumentFilter::by_type("note").with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_returns_false() {
        let provider = provider();
        let mut doc = Document::new("note", serde_json::json!({}));
        doc.id = "missing".into();

        assert!(!provider.update(&scope(), doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_many_counts() {
        let provider = provider();
        let service = DocumentService::new(Arc::new(provider));

        let mut request = DocumentRequest::scoped(scope());
        request.document = Some(Document::new("note", serde_json::json!({})));
        let a = service.save_impl(&request).await.unwrap();
        request.document = Some(Document::new("note", serde_json::json!({})));
        let b = service.save_impl(&request).await.unwrap();

        let mut delete = DocumentRequest::scoped(scope());
        delete.ids = vec![a.id, b.id, "missing".into()];
        assert_eq!(service.delete_many_impl(&delete).await.unwrap(), 2);
    }
}
