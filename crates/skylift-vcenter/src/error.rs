//! Platform facade error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcenterError {
    #[error("Session login failed: {0}")]
    SessionFailed(String),

    #[error("Platform API error: {0}")]
    ApiError(String),

    #[error("Datastore not found: {0}")]
    DatastoreNotFound(String),

    #[error("Resource pool not found: {0}")]
    ResourcePoolNotFound(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Library item not found: {0}")]
    ItemNotFound(String),

    #[error("Deployment failed: {0}")]
    DeployFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VcenterError>;
