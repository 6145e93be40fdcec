//! Workflow error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow for {0} is already complete; continuation rejected")]
    AlreadyComplete(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
