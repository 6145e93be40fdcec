//! Completion notifier
//!
//! Reports terminal workflow status back to the orchestration caller with
//! a single HTTP PUT to the caller-supplied response URL. Any 2xx counts
//! as delivered; everything else is an error for the caller to handle.

pub mod error;

pub use error::{NotifyError, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skylift_config::CallbackContext;

/// Terminal status reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Failed,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionStatus::Success => write!(f, "SUCCESS"),
            CompletionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Wire body of the completion callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionBody {
    pub status: CompletionStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: serde_json::Value,
}

impl CompletionBody {
    pub fn new(
        callback: &CallbackContext,
        status: CompletionStatus,
        data: serde_json::Value,
    ) -> Self {
        Self {
            status,
            reason: format!(
                "See the details in log stream: {}",
                callback.log_stream_name
            ),
            physical_resource_id: callback.log_stream_name.clone(),
            stack_id: callback.stack_id.clone(),
            request_id: callback.request_id.clone(),
            logical_resource_id: callback.logical_resource_id.clone(),
            data,
        }
    }
}

/// Seam for reporting completion, mockable in workflow tests.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(
        &self,
        callback: &CallbackContext,
        status: CompletionStatus,
        data: serde_json::Value,
    ) -> Result<()>;
}

/// Production notifier: one best-effort HTTP PUT per call.
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionNotifier for HttpNotifier {
    async fn notify(
        &self,
        callback: &CallbackContext,
        status: CompletionStatus,
        data: serde_json::Value,
    ) -> Result<()> {
        let body = CompletionBody::new(callback, status, data);
        tracing::info!(
            "sending {} completion for request {}",
            body.status,
            body.request_id
        );

        let response = self
            .client
            .put(&callback.response_url)
            .json(&body)
            .send()
            .await?;

        let http_status = response.status();
        if !http_status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("completion callback rejected ({}): {}", http_status, text);
            return Err(NotifyError::Rejected(http_status));
        }

        Ok(())
    }
}
