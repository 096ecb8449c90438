//! Secret service
//!
//! Opaque secret values behind a scoped builder: tenant-wide, agent-wide or
//! per-user. Fetch-by-key is a strict scope match; a tenant secret is never
//! returned for an agent-scope lookup with the same key.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::http::HttpClient;

use super::scope::ServiceScope;

/// Visibility scope of a secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "userId", rename_all = "snake_case")]
pub enum SecretScope {
    /// Shared by every agent of the tenant
    Tenant,

    /// Private to the current agent
    Agent,

    /// Private to the agent + one participant
    User(String),
}

impl SecretScope {
    fn wire_params(&self) -> (&'static str, Option<&str>) {
        match self {
            Self::Tenant => ("tenant", None),
            Self::Agent => ("agent", None),
            Self::User(user_id) => ("user", Some(user_id)),
        }
    }
}

/// A stored secret; the value is opaque to the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub key: String,
    pub value: String,
    pub scope: SecretScope,
}

/// Storage backend for secrets
#[async_trait::async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<Option<Secret>, XiansError>;

    async fn set(
        &self,
        scope: &ServiceScope,
        secret: Secret,
    ) -> Result<(), XiansError>;

    async fn delete(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<bool, XiansError>;

    async fn list(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
    ) -> Result<Vec<String>, XiansError>;
}

/// HTTP provider against the backend secret vault
pub struct ServerSecretProvider {
    http: Arc<HttpClient>,
}

impl ServerSecretProvider {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl SecretProvider for ServerSecretProvider {
    async fn get(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<Option<Secret>, XiansError> {
        let (kind, user_id) = secret_scope.wire_params();
        let mut query: Vec<(&str, &str)> =
            vec![("key", key), ("scope", kind), ("agent", &scope.agent)];
        if let Some(user_id) = user_id {
            query.push(("userId", user_id));
        }
        Ok(self.http.get_json_opt("/api/agent/secrets", &query).await?)
    }

    async fn set(&self, scope: &ServiceScope, secret: Secret) -> Result<(), XiansError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SetBody<'a> {
            agent: &'a str,
            #[serde(flatten)]
            secret: &'a Secret,
        }
        self.http
            .post_unit(
                "/api/agent/secrets",
                &SetBody {
                    agent: &scope.agent,
                    secret: &secret,
                },
            )
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<bool, XiansError> {
        let (kind, user_id) = secret_scope.wire_params();
        let mut query: Vec<(&str, &str)> =
            vec![("key", key), ("scope", kind), ("agent", &scope.agent)];
        if let Some(user_id) = user_id {
            query.push(("userId", user_id));
        }
        Ok(self.http.delete("/api/agent/secrets", &query).await?)
    }

    async fn list(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
    ) -> Result<Vec<String>, XiansError> {
        let (kind, user_id) = secret_scope.wire_params();
        let mut query: Vec<(&str, &str)> = vec![("scope", kind), ("agent", &scope.agent)];
        if let Some(user_id) = user_id {
            query.push(("userId", user_id));
        }
        Ok(self.http.get_json("/api/agent/secrets", &query).await?)
    }
}

/// In-memory provider for local mode
#[derive(Default)]
pub struct LocalSecretProvider {
    secrets: dashmap::DashMap<(String, String, SecretScope, String), Secret>,
}

impl LocalSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> (String, String, SecretScope, String) {
        // Tenant-wide secrets are shared across agents of the tenant.
        let agent = match secret_scope {
            SecretScope::Tenant => String::new(),
            _ => scope.agent.clone(),
        };
        (
            scope.tenant.clone(),
            agent,
            secret_scope.clone(),
            key.to_string(),
        )
    }
}

#[async_trait::async_trait]
impl SecretProvider for LocalSecretProvider {
    async fn get(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<Option<Secret>, XiansError> {
        Ok(self
            .secrets
            .get(&Self::key(scope, secret_scope, key))
            .map(|s| s.clone()))
    }

    async fn set(&self, scope: &ServiceScope, secret: Secret) -> Result<(), XiansError> {
        self.secrets
            .insert(Self::key(scope, &secret.scope, &secret.key), secret);
        Ok(())
    }

    async fn delete(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
        key: &str,
    ) -> Result<bool, XiansError> {
        Ok(self
            .secrets
            .remove(&Self::key(scope, secret_scope, key))
            .is_some())
    }

    async fn list(
        &self,
        scope: &ServiceScope,
        secret_scope: &SecretScope,
    ) -> Result<Vec<String>, XiansError> {
        let probe = Self::key(scope, secret_scope, "");
        let mut keys: Vec<String> = self
            .secrets
            .iter()
            .filter(|e| e.key().0 == probe.0 && e.key().1 == probe.1 && e.key().2 == probe.2)
            .map(|e| e.key().3.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Request payload carried by the secret system activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRequest {
    pub scope: ServiceScope,
    pub secret_scope: SecretScope,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Secrets facade; use [`SecretsService::tenant`], [`SecretsService::agent`]
/// or [`SecretsService::user`] to pick a scope
pub struct SecretsService {
    provider: Arc<dyn SecretProvider>,
}

impl SecretsService {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self { provider }
    }

    pub fn tenant(&self) -> ScopedSecrets<'_> {
        ScopedSecrets {
            service: self,
            scope: SecretScope::Tenant,
        }
    }

    pub fn agent(&self) -> ScopedSecrets<'_> {
        ScopedSecrets {
            service: self,
            scope: SecretScope::Agent,
        }
    }

    pub fn user(&self, user_id: impl Into<String>) -> ScopedSecrets<'_> {
        ScopedSecrets {
            service: self,
            scope: SecretScope::User(user_id.into()),
        }
    }

    // Direct-path implementations, shared with the system activity handlers.

    pub(crate) async fn get_impl(
        &self,
        request: &SecretRequest,
    ) -> Result<Option<Secret>, XiansError> {
        self.provider
            .get(&request.scope, &request.secret_scope, &request.key)
            .await
    }

    pub(crate) async fn set_impl(&self, request: &SecretRequest) -> Result<(), XiansError> {
        let value = request
            .value
            .clone()
            .ok_or_else(|| XiansError::Configuration("secret set requires a value".into()))?;
        self.provider
            .set(
                &request.scope,
                Secret {
                    key: request.key.clone(),
                    value,
                    scope: request.secret_scope.clone(),
                },
            )
            .await
    }

    pub(crate) async fn delete_impl(&self, request: &SecretRequest) -> Result<bool, XiansError> {
        self.provider
            .delete(&request.scope, &request.secret_scope, &request.key)
            .await
    }

    pub(crate) async fn list_impl(
        &self,
        request: &SecretRequest,
    ) -> Result<Vec<String>, XiansError> {
        self.provider
            .list(&request.scope, &request.secret_scope)
            .await
    }
}

/// Secret CRUD bound to one scope
pub struct ScopedSecrets<'a> {
    service: &'a SecretsService,
    scope: SecretScope,
}

impl ScopedSecrets<'_> {
    fn request(&self, key: &str, value: Option<String>) -> Result<SecretRequest, XiansError> {
        Ok(SecretRequest {
            scope: ServiceScope::ambient()?,
            secret_scope: self.scope.clone(),
            key: key.to_string(),
            value,
        })
    }

    /// Fetch a secret value; strict scope match
    pub async fn get(&self, key: &str) -> Result<Option<Secret>, XiansError> {
        let request = self.request(key, None)?;
        executor::execute(
            activity_names::SECRET_GET,
            &request,
            self.service.get_impl(&request),
        )
        .await
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) -> Result<(), XiansError> {
        let request = self.request(key, Some(value.into()))?;
        executor::execute(activity_names::SECRET_SET, &request, async {
            self.service.set_impl(&request).await?;
            Ok(serde_json::Value::Null)
        })
        .await
        .map(|_: serde_json::Value| ())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, XiansError> {
        let request = self.request(key, None)?;
        executor::execute(
            activity_names::SECRET_DELETE,
            &request,
            self.service.delete_impl(&request),
        )
        .await
    }

    /// List keys in this scope; values stay in the vault
    pub async fn list(&self) -> Result<Vec<String>, XiansError> {
        let request = self.request("", None)?;
        executor::execute(
            activity_names::SECRET_LIST,
            &request,
            self.service.list_impl(&request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ServiceScope {
        ServiceScope::new("acme", "A")
    }

    fn request(secret_scope: SecretScope, key: &str, value: Option<&str>) -> SecretRequest {
        SecretRequest {
            scope: scope(),
            secret_scope,
            key: key.into(),
            value: value.map(String::from),
        }
    }

    fn service() -> SecretsService {
        SecretsService::new(Arc::new(LocalSecretProvider::new()))
    }

    #[tokio::test]
    async fn test_round_trip_per_scope() {
        let service = service();
        service
            .set_impl(&request(SecretScope::Agent, "token", Some("a-1")))
            .await
            .unwrap();

        let secret = service
            .get_impl(&request(SecretScope::Agent, "token", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.value, "a-1");
    }

    #[tokio::test]
    async fn test_strict_scope_match() {
        let service = service();
        service
            .set_impl(&request(SecretScope::Tenant, "token", Some("t-1")))
            .await
            .unwrap();

        // Same key, different scope: no match.
        assert!(service
            .get_impl(&request(SecretScope::Agent, "token", None))
            .await
            .unwrap()
            .is_none());
        assert!(service
            .get_impl(&request(SecretScope::User("u1".into()), "token", None))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_user_secrets_are_per_user() {
        let service = service();
        service
            .set_impl(&request(SecretScope::User("u1".into()), "pref", Some("dark")))
            .await
            .unwrap();

        assert!(service
            .get_impl(&request(SecretScope::User("u2".into()), "pref", None))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_returns_keys_only() {
        let service = service();
        service
            .set_impl(&request(SecretScope::Agent, "b", Some("2")))
            .await
            .unwrap();
        service
            .set_impl(&request(SecretScope::Agent, "a", Some("1")))
            .await
            .unwrap();

        let keys = service
            .list_impl(&request(SecretScope::Agent, "", None))
            .await
            .unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_delete() {
        let service = service();
        service
            .set_impl(&request(SecretScope::Agent, "k", Some("v")))
            .await
            .unwrap();

        assert!(service
            .delete_impl(&request(SecretScope::Agent, "k", None))
            .await
            .unwrap());
        assert!(!service
            .delete_impl(&request(SecretScope::Agent, "k", None))
            .await
            .unwrap());
    }
}
