//! Workflow error types.

use huddle_core::WorkflowId;

/// Errors surfaced by the workflow engine.
///
/// Step-level failures are not errors: they land inside the execution
/// outcome. These variants are for preconditions and the one step shape
/// the executor refuses to attempt.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// No workflow with this ID exists.
    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    /// A step carried a type the executor has no handler for.
    #[error("unsupported step type: {0}")]
    UnsupportedStepType(String),

    /// The caller is not allowed to mutate this workflow.
    #[error("not authorized to modify this workflow")]
    Unauthorized,
}
