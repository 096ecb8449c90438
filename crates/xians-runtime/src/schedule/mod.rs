//! Schedules
//!
//! Fluent creation of cron/interval/calendar schedules plus tenant-safe
//! management. Every id is rewritten to `{tenant}:{scheduleId}` on create
//! and on all management calls, and `list` only returns the current
//! tenant's schedules.

mod activity;
mod builder;

pub use activity::{create_if_not_exists, CreateScheduleRequest};
pub use builder::{ScheduleBuilder, ScheduleHandle};

use std::sync::Arc;

use xians_engine::{BackfillRequest, ScheduleDescription, ScheduleSummary};

use crate::agent::AgentRegistry;
use crate::client::EngineClient;
use crate::context::Context;
use crate::error::XiansError;

/// Schedule facade
pub struct ScheduleClient {
    pub(crate) engine: EngineClient,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) default_tenant: Option<String>,
}

impl ScheduleClient {
    pub fn new(
        engine: EngineClient,
        registry: Arc<AgentRegistry>,
        default_tenant: Option<String>,
    ) -> Self {
        Self {
            engine,
            registry,
            default_tenant,
        }
    }

    /// Start building a schedule with a caller-supplied id
    ///
    /// # Example
    ///
    /// ```ignore
    /// schedules.create("daily").daily(9, 0).with_input(&"x").start().await?;
    /// ```
    pub fn create(&self, schedule_id: impl Into<String>) -> ScheduleBuilder<'_> {
        ScheduleBuilder::new(self, schedule_id.into())
    }

    /// The tenant owning schedule operations right now
    pub(crate) fn tenant(&self) -> Result<String, XiansError> {
        if let Ok(ctx) = Context::current() {
            if let Some(tenant) = ctx.tenant_id {
                return Ok(tenant);
            }
        }
        self.default_tenant
            .clone()
            .ok_or_else(|| XiansError::Configuration("no tenant available for schedules".into()))
    }

    /// Rewrite a caller-supplied id to its tenant-prefixed form
    pub(crate) fn rewrite(&self, schedule_id: &str) -> Result<String, XiansError> {
        Ok(format!("{}:{schedule_id}", self.tenant()?))
    }

    pub async fn describe(&self, schedule_id: &str) -> Result<ScheduleDescription, XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().describe_schedule(&id).await?)
    }

    pub async fn pause(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().pause_schedule(&id, note).await?)
    }

    pub async fn unpause(
        &self,
        schedule_id: &str,
        note: Option<String>,
    ) -> Result<(), XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().unpause_schedule(&id, note).await?)
    }

    pub async fn trigger(&self, schedule_id: &str) -> Result<(), XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().trigger_schedule(&id).await?)
    }

    pub async fn delete(&self, schedule_id: &str) -> Result<(), XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().delete_schedule(&id).await?)
    }

    /// List the current tenant's schedules
    pub async fn list(&self) -> Result<Vec<ScheduleSummary>, XiansError> {
        let prefix = format!("{}:", self.tenant()?);
        Ok(self.engine.engine().list_schedules(Some(&prefix)).await?)
    }

    pub async fn backfill(
        &self,
        schedule_id: &str,
        request: BackfillRequest,
    ) -> Result<(), XiansError> {
        let id = self.rewrite(schedule_id)?;
        Ok(self.engine.engine().backfill_schedule(&id, request).await?)
    }
}
