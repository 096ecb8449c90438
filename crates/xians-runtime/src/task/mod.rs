//! Human-in-the-loop task workflows
//!
//! A task presents draft work to a participant who may update it and then
//! perform one of the allowed actions, or let the task time out. State is
//! durable via the engine; the facade gives non-workflow code signal/query
//! access.

mod facade;
pub mod state;
pub mod workflow;

pub use facade::{HitlTask, TaskService};
pub use state::{
    TaskInfo, TaskRejection, TaskState, TaskStatus, TaskWorkflowRequest, TaskWorkflowResult,
};
pub use workflow::{
    LegacyActionRequest, PerformActionRequest, TaskWorkflow, UpdateDraftRequest,
};
