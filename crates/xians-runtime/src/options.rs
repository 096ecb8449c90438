//! Runtime configuration
//!
//! `XiansOptions` is validated once at platform init; configuration problems
//! fail fast and are never retried.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::XiansError;

/// Cache tuning for one cached collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntryOptions {
    pub enabled: bool,
    #[serde(with = "xians_engine::retry::duration_millis")]
    pub ttl: Duration,
}

impl Default for CacheEntryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Cache tuning per cached collection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheOptions {
    pub knowledge: CacheEntryOptions,
    pub settings: CacheEntryOptions,
    pub workflow_definitions: CacheEntryOptions,
}

/// Platform configuration
///
/// # Example
///
/// ```
/// use xians_runtime::options::XiansOptions;
///
/// let options = XiansOptions::new("https://api.example.com")
///     .with_api_key("sk-test")
///     .with_tenant_id("acme");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XiansOptions {
    /// Backend base URL
    pub server_url: String,

    /// Bearer token; may be a JWT carrying a `tenant_id` claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base64 PEM client certificate, alternative to `api_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_base64: Option<String>,

    /// Base64 PEM private key paired with `certificate_base64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_base64: Option<String>,

    /// Explicit default tenant; wins over the JWT claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Console sink level filter, e.g. `info` or `xians=debug`
    #[serde(default = "default_console_level")]
    pub console_log_level: String,

    /// Server sink level filter for the batched log uploader
    #[serde(default = "default_server_level")]
    pub server_log_level: String,

    /// Serve capability services from in-memory providers instead of HTTP
    #[serde(default)]
    pub local_mode: bool,

    /// Cache tuning
    #[serde(default)]
    pub cache: CacheOptions,
}

fn default_console_level() -> String {
    "info".to_string()
}

fn default_server_level() -> String {
    "warn".to_string()
}

impl XiansOptions {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: None,
            certificate_base64: None,
            private_key_base64: None,
            tenant_id: None,
            console_log_level: default_console_level(),
            server_log_level: default_server_level(),
            local_mode: false,
            cache: CacheOptions::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_certificate(
        mut self,
        certificate_base64: impl Into<String>,
        private_key_base64: impl Into<String>,
    ) -> Self {
        self.certificate_base64 = Some(certificate_base64.into());
        self.private_key_base64 = Some(private_key_base64.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_console_log_level(mut self, level: impl Into<String>) -> Self {
        self.console_log_level = level.into();
        self
    }

    pub fn with_server_log_level(mut self, level: impl Into<String>) -> Self {
        self.server_log_level = level.into();
        self
    }

    pub fn with_local_mode(mut self, local_mode: bool) -> Self {
        self.local_mode = local_mode;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    /// Validate the options; called at platform init
    pub fn validate(&self) -> Result<(), XiansError> {
        if !self.local_mode {
            if self.server_url.is_empty() {
                return Err(XiansError::Configuration("server_url is required".into()));
            }
            reqwest::Url::parse(&self.server_url).map_err(|e| {
                XiansError::Configuration(format!("server_url is not a valid URL: {e}"))
            })?;

            let has_certificate =
                self.certificate_base64.is_some() && self.private_key_base64.is_some();
            if self.api_key.is_none() && !has_certificate {
                return Err(XiansError::Configuration(
                    "either api_key or certificate_base64 + private_key_base64 is required".into(),
                ));
            }
            if self.certificate_base64.is_some() != self.private_key_base64.is_some() {
                return Err(XiansError::Configuration(
                    "certificate_base64 and private_key_base64 must be supplied together".into(),
                ));
            }
        }
        Ok(())
    }

    /// The default tenant for this process: the explicit option, falling back
    /// to the `tenant_id` claim of a JWT-shaped API key.
    pub fn resolved_tenant(&self) -> Option<String> {
        if let Some(tenant) = &self.tenant_id {
            return Some(tenant.clone());
        }
        self.api_key.as_deref().and_then(tenant_from_jwt)
    }

    /// Bearer token sent on backend requests
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Concatenated PEM (certificate + key) for client TLS identity
    pub fn identity_pem(&self) -> Result<Option<Vec<u8>>, XiansError> {
        let (Some(cert), Some(key)) = (&self.certificate_base64, &self.private_key_base64) else {
            return Ok(None);
        };
        let decode = |label: &str, value: &str| {
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|e| XiansError::Configuration(format!("{label} is not valid base64: {e}")))
        };
        let mut pem = decode("certificate_base64", cert)?;
        pem.push(b'\n');
        pem.extend(decode("private_key_base64", key)?);
        Ok(Some(pem))
    }
}

/// Claims read from a JWT-shaped API key
#[derive(Debug, Deserialize)]
struct ApiKeyClaims {
    #[serde(default, alias = "tenantId")]
    tenant_id: Option<String>,
}

/// Read the tenant claim from a JWT without verifying its signature
///
/// The key is only used to *identify* the default tenant; the backend
/// verifies it on every request.
fn tenant_from_jwt(token: &str) -> Option<String> {
    let header = jsonwebtoken::decode_header(token).ok()?;
    let mut validation = jsonwebtoken::Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let key = jsonwebtoken::DecodingKey::from_secret(&[]);
    let data = jsonwebtoken::decode::<ApiKeyClaims>(token, &key, &validation).ok()?;
    data.claims.tenant_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn jwt_with_claims(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_validate_requires_credentials() {
        let err = XiansOptions::new("https://api.example.com")
            .validate()
            .unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let err = XiansOptions::new("not a url")
            .with_api_key("k")
            .validate()
            .unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }

    #[test]
    fn test_local_mode_needs_no_credentials() {
        let options = XiansOptions::new("").with_local_mode(true);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_explicit_tenant_wins_over_jwt() {
        let token = jwt_with_claims(serde_json::json!({"tenant_id": "from-jwt"}));
        let options = XiansOptions::new("https://api.example.com")
            .with_api_key(token)
            .with_tenant_id("explicit");

        assert_eq!(options.resolved_tenant().as_deref(), Some("explicit"));
    }

    #[test]
    fn test_tenant_derived_from_jwt_claim() {
        let token = jwt_with_claims(serde_json::json!({"tenant_id": "acme"}));
        let options = XiansOptions::new("https://api.example.com").with_api_key(token);

        assert_eq!(options.resolved_tenant().as_deref(), Some("acme"));
    }

    #[test]
    fn test_tenant_claim_accepts_camel_case() {
        let token = jwt_with_claims(serde_json::json!({"tenantId": "acme"}));
        let options = XiansOptions::new("https://api.example.com").with_api_key(token);

        assert_eq!(options.resolved_tenant().as_deref(), Some("acme"));
    }

    #[test]
    fn test_opaque_key_yields_no_tenant() {
        let options = XiansOptions::new("https://api.example.com").with_api_key("sk-opaque");
        assert_eq!(options.resolved_tenant(), None);
    }

    #[test]
    fn test_certificate_halves_must_pair() {
        let mut options = XiansOptions::new("https://api.example.com").with_api_key("k");
        options.certificate_base64 = Some("Y2VydA==".into());

        let err = options.validate().unwrap_err();
        assert!(matches!(err, XiansError::Configuration(_)));
    }
}
