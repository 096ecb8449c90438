//! The `schedule.create` system activity
//!
//! Workflow code cannot call the engine's schedule API directly, so the
//! builder routes creation through this activity. Creation is idempotent:
//! the duplicate-id error is swallowed, which is what retried workflow code
//! needs.

use tracing::debug;
use xians_engine::{EngineError, ScheduleOptions};

use crate::client::EngineClient;
use crate::error::XiansError;

/// Input of the `schedule.create` activity
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateScheduleRequest {
    pub options: ScheduleOptions,
}

/// Create the schedule unless it already exists
pub async fn create_if_not_exists(
    engine: &EngineClient,
    request: &CreateScheduleRequest,
) -> Result<(), XiansError> {
    match engine
        .engine()
        .create_schedule(request.options.clone())
        .await
    {
        Ok(()) => Ok(()),
        Err(EngineError::ScheduleAlreadyExists(id)) => {
            debug!(schedule_id = %id, "schedule already exists, create skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
