//! Capability services
//!
//! Knowledge, documents and secrets share one shape: a provider trait with a
//! server (HTTP) and a local (in-memory) implementation, a facade that
//! resolves the ambient tenant + agent scope, and context-aware routing so
//! workflow callers get activity executions.

pub mod cache;
pub mod documents;
pub mod knowledge;
pub mod scope;
pub mod secrets;

pub use documents::{
    Document, DocumentFilter, DocumentProvider, DocumentService, LocalDocumentProvider,
    SaveDocumentOptions, ServerDocumentProvider,
};
pub use knowledge::{
    Knowledge, KnowledgeProvider, KnowledgeService, LocalKnowledgeProvider,
    ServerKnowledgeProvider,
};
pub use scope::ServiceScope;
pub use secrets::{
    LocalSecretProvider, ScopedSecrets, Secret, SecretProvider, SecretScope, SecretsService,
    ServerSecretProvider,
};
