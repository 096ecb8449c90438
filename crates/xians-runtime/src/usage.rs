//! Usage reporting
//!
//! Fire-and-forget metrics: `report` never blocks the caller on the network
//! and never surfaces delivery errors. From workflow code the record rides
//! the `usage.report` activity; the POST itself happens on a detached task
//! either way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::Context;
use crate::error::XiansError;
use crate::executor::{self, activity_names};
use crate::http::HttpClient;

/// One usage record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Metric name, e.g. `llm.tokens` or `messages.handled`
    pub metric: String,

    pub quantity: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl UsageRecord {
    pub fn new(metric: impl Into<String>, quantity: f64) -> Self {
        Self {
            metric: metric.into(),
            quantity,
            tenant_id: None,
            agent: None,
            workflow_type: None,
            metadata: None,
            at: None,
        }
    }

    /// Fill tenancy fields from the ambient context where absent
    fn enriched(mut self) -> Self {
        if let Ok(ctx) = Context::current() {
            if self.tenant_id.is_none() {
                self.tenant_id = ctx.tenant_id;
            }
            if self.agent.is_none() {
                self.agent = Some(ctx.agent_name);
            }
            if self.workflow_type.is_none() {
                self.workflow_type = Some(ctx.workflow_type);
            }
        }
        self
    }
}

/// Usage sink shared by the platform
pub struct UsageReporter {
    http: Arc<HttpClient>,
}

impl UsageReporter {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Report a usage record
    ///
    /// Never fails on delivery problems; those are logged as warnings.
    pub async fn report(&self, record: UsageRecord) -> Result<(), XiansError> {
        let record = record.enriched();
        executor::execute(activity_names::USAGE_REPORT, &record, async {
            self.deliver(record.clone());
            Ok(serde_json::Value::Null)
        })
        .await
        .map(|_: serde_json::Value| ())
    }

    /// POST on a detached task; shared with the `usage.report` activity
    pub(crate) fn deliver(&self, record: UsageRecord) {
        let http = self.http.clone();
        let ambient = Context::current().ok();
        tokio::spawn(async move {
            let post = http.post_unit("/api/agent/usage/report", &record);
            // Keep the tenant stamp alive on the detached task.
            let result = match ambient {
                Some(ctx) => Context::scope(ctx, post).await,
                None => post.await,
            };
            if let Err(e) = result {
                warn!(metric = %record.metric, error = %e, "usage report failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_shape() {
        let record = UsageRecord::new("llm.tokens", 128.0);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["metric"], "llm.tokens");
        assert_eq!(json["quantity"], 128.0);
        assert!(json.get("tenantId").is_none());
    }

    #[test]
    fn test_enrichment_without_context_is_identity() {
        let record = UsageRecord::new("m", 1.0).enriched();
        assert_eq!(record.tenant_id, None);
        assert_eq!(record.agent, None);
    }
}
