//! # huddle-workflows
//!
//! Workflow definitions and their sequential execution:
//!
//! - **Model**: steps, statuses, instances, and the append-only execution
//!   history
//! - **Executor**: runs one step (outbound HTTP or a registered local
//!   function); failures are results, not errors
//! - **Engine**: in-memory instance store plus the execute path, with
//!   per-instance serialization of concurrent runs

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod executor;
pub mod model;

pub use engine::{HistoryEntry, WorkflowEngine};
pub use error::WorkflowError;
pub use executor::{DEFAULT_STEP_TIMEOUT, FunctionRegistry, StepExecutor, StepFn};
pub use model::{
    ExecutionOutcome, ExecutionRecord, RecordStatus, Step, StepKind, StepResult, StepStatus,
    WorkflowInstance, WorkflowStatus,
};
