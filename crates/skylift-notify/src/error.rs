//! Notifier error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Callback returned non-success status: {0}")]
    Rejected(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
