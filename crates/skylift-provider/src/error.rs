//! Provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Director API error: {0}")]
    ApiError(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Network edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Firewall rule not found: {0}")]
    RuleNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid edge name pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
