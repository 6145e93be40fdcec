//! Skylift workflow core
//!
//! A resumable, externally-driven provisioning state machine. Each
//! invocation runs one step against current provider state and returns
//! the updated [`WorkflowState`]; the external scheduler re-invokes after
//! the returned wait hint. All progress lives in the state payload, so a
//! crashed or retried invocation resumes cleanly from the last step.

pub mod engine;
pub mod error;
pub mod state;

// Re-exports
pub use engine::{Engine, EngineLimits};
pub use error::{Result, WorkflowError};
pub use state::{Step, StepOutcome, WorkflowState};
