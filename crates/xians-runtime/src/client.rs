//! Engine client wrapper
//!
//! A thin, cloneable wrapper over the engine trait object. Start helpers
//! stamp tenant and system-scope into the workflow memo so downstream
//! validators never reparse ids.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use xians_engine::{
    EngineWorker, Memo, StartWorkflowOptions, WorkerOptions, WorkflowDescription, WorkflowEngine,
    WorkflowHandle,
};

use crate::error::XiansError;
use crate::http::HttpClient;
use crate::identifier;

/// Engine connection settings served by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Engine endpoint URL
    pub url: String,

    /// Engine namespace
    pub namespace: String,
}

/// Fetch engine connection settings from the backend
pub async fn fetch_engine_settings(http: &HttpClient) -> Result<EngineSettings, XiansError> {
    Ok(http.get_json("/api/agent/settings/flowserver", &[]).await?)
}

/// Cloneable engine client shared by all capability services
#[derive(Clone)]
pub struct EngineClient {
    engine: Arc<dyn WorkflowEngine>,
}

impl EngineClient {
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn WorkflowEngine> {
        &self.engine
    }

    /// Start a workflow for a tenant, deriving id, queue and memo from the
    /// identifier rules
    pub async fn start_for_tenant(
        &self,
        tenant: &str,
        workflow_type: &str,
        suffix: Option<&str>,
        system_scoped: bool,
        input: serde_json::Value,
    ) -> Result<WorkflowHandle, XiansError> {
        let workflow_id = identifier::build(tenant, workflow_type, suffix);
        let task_queue =
            identifier::task_queue(workflow_type, system_scoped, Some(tenant))?;
        let options = StartWorkflowOptions::new(workflow_type, workflow_id, task_queue, input)
            .with_memo(Memo::for_tenant(tenant, system_scoped));
        Ok(self.engine.start_workflow(options).await?)
    }

    pub async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
    ) -> Result<WorkflowHandle, XiansError> {
        Ok(self.engine.start_workflow(options).await?)
    }

    pub async fn signal(
        &self,
        workflow_id: &str,
        name: &str,
        payload: &(impl Serialize + ?Sized),
    ) -> Result<(), XiansError> {
        Ok(self
            .engine
            .signal_workflow(workflow_id, name, serde_json::to_value(payload)?)
            .await?)
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<T, XiansError> {
        let value = self
            .engine
            .query_workflow(workflow_id, name, serde_json::to_value(args)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        name: &str,
        args: &(impl Serialize + ?Sized),
    ) -> Result<T, XiansError> {
        let value = self
            .engine
            .update_workflow(workflow_id, name, serde_json::to_value(args)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn describe(&self, workflow_id: &str) -> Result<WorkflowDescription, XiansError> {
        Ok(self.engine.describe_workflow(workflow_id).await?)
    }

    /// Await a workflow's result, deserialized
    pub async fn result<T: DeserializeOwned>(&self, workflow_id: &str) -> Result<T, XiansError> {
        let value = self.engine.workflow_result(workflow_id).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn worker(&self, options: WorkerOptions) -> Result<Arc<dyn EngineWorker>, XiansError> {
        Ok(self.engine.worker(options)?)
    }
}
