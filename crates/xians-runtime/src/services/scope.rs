//! Tenant + agent scoping for capability services

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::XiansError;

/// The (tenant, agent) pair every capability request is scoped to
///
/// Resolved from the ambient context; system-scoped agents have no default
/// tenant, so calling a capability service outside workflow/activity
/// execution fails with `NoAmbientContext`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceScope {
    pub tenant: String,
    pub agent: String,
}

impl ServiceScope {
    pub fn new(tenant: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            agent: agent.into(),
        }
    }

    /// Resolve from the ambient context
    pub fn ambient() -> Result<Self, XiansError> {
        let ctx = Context::current()?;
        let tenant = ctx.tenant_id.ok_or(XiansError::NoAmbientContext)?;
        Ok(Self {
            tenant,
            agent: ctx.agent_name,
        })
    }
}
