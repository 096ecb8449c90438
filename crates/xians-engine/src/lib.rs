//! # Durable Workflow Engine Surface
//!
//! The trait surface the Xians agent runtime consumes from a Temporal-style
//! durable workflow engine, plus an in-memory implementation for tests and
//! local mode.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowEngine (client)                  │
//! │  (start, signal, query, update, schedules, direct activity) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EngineWorker                           │
//! │  (workflow factories + activity handlers per task queue)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               WorkflowRun + WorkflowContext                  │
//! │  (async run body; serialized signal/query/update handlers)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Workflow code suspends only on engine-provided awaits and reads time,
//! randomness and identifiers exclusively through [`WorkflowContext`]. The
//! in-memory engine does not replay; a durable binding records and
//! substitutes those values.
//!
//! ## Example
//!
//! ```ignore
//! use xians_engine::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl WorkflowRun for Greeter {
//!     async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
//!         let reply = ctx
//!             .execute_activity("greet", input, ActivityOptions::default())
//!             .await
//!             .map_err(|e| WorkflowError::new(e.to_string()))?;
//!         Ok(reply)
//!     }
//! }
//! ```

pub mod activity;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod options;
pub mod retry;
pub mod schedule;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        activity_handler, ActivityContext, ActivityError, ActivityHandler, ActivityOptions,
        ActivityResult,
    };
    pub use crate::context::{WorkflowApi, WorkflowContext, WorkflowInfo};
    pub use crate::engine::{EngineWorker, WorkerOptions, WorkflowEngine};
    pub use crate::error::EngineError;
    pub use crate::memory::InMemoryEngine;
    pub use crate::options::{
        ChildWorkflowOptions, IdReusePolicy, Memo, ParentClosePolicy, StartWorkflowOptions,
        WorkflowDescription, WorkflowExecutionStatus, WorkflowHandle,
    };
    pub use crate::retry::RetryPolicy;
    pub use crate::schedule::{
        BackfillRequest, ScheduleDescription, ScheduleOptions, ScheduleOverlapPolicy, ScheduleSpec,
        ScheduleSummary,
    };
    pub use crate::workflow::{
        workflow_factory, SignalContext, WorkflowError, WorkflowFactory, WorkflowRun,
    };
}

// Re-export key types at crate root
pub use activity::{
    activity_handler, ActivityContext, ActivityError, ActivityHandler, ActivityOptions,
    ActivityResult,
};
pub use context::{WorkflowApi, WorkflowContext, WorkflowInfo};
pub use engine::{EngineWorker, WorkerOptions, WorkflowEngine};
pub use error::EngineError;
pub use memory::{ActivityExecution, InMemoryEngine};
pub use options::{
    ChildWorkflowOptions, IdReusePolicy, Memo, ParentClosePolicy, StartWorkflowOptions,
    WorkflowDescription, WorkflowExecutionStatus, WorkflowHandle,
};
pub use retry::RetryPolicy;
pub use schedule::{
    BackfillRequest, ScheduleDescription, ScheduleOptions, ScheduleOverlapPolicy, ScheduleSpec,
    ScheduleSummary,
};
pub use workflow::{workflow_factory, SignalContext, WorkflowError, WorkflowFactory, WorkflowRun};
