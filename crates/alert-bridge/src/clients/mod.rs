//! REST clients for Sentry, Datadog and Asana.
//!
//! The consumer talks to them through two seams: [`LinkStore`] for the
//! provider that remembers which task an alert was filed as, and
//! [`TaskTracker`] for the task tracker itself.

pub mod asana;
pub mod datadog;
pub mod sentry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::compose::TaskInput;
use crate::error::ClientError;

pub use asana::AsanaClient;
pub use datadog::DatadogClient;
pub use sentry::SentryClient;

/// A task the tracker accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedTask {
    pub gid: String,
    #[serde(default)]
    pub permalink_url: Option<String>,
}

impl CreatedTask {
    /// Browser link to the task.
    #[must_use]
    pub fn link(&self) -> String {
        self.permalink_url
            .clone()
            .unwrap_or_else(|| format!("https://app.asana.com/0/0/{}", self.gid))
    }
}

/// Where the upstream provider records the task filed for an alert.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Link to the most recent task filed for `key`, if any.
    async fn find_task_link(&self, key: &str) -> Result<Option<String>, ClientError>;

    /// Record `task` against `key`.
    async fn write_task_link(&self, key: &str, task: &CreatedTask) -> Result<(), ClientError>;
}

/// The team task tracker.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Notes of an existing task; `None` when it is gone or private.
    async fn task_notes(&self, gid: &str) -> Result<Option<String>, ClientError>;

    async fn create_task(&self, task: &TaskInput) -> Result<CreatedTask, ClientError>;

    /// Most recently created live project in a portfolio.
    async fn latest_project(&self, portfolio: &str) -> Result<Option<String>, ClientError>;
}

/// Task gid from a task link: the last all-digit path segment.
#[must_use]
pub fn task_gid_from_link(link: &str) -> Option<String> {
    link.split(['/', '?', '#'])
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .last()
        .map(str::to_string)
}

/// Turn a non-success response into [`ClientError::Status`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    service: &'static str,
) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status,
        body,
    })
}

/// Decode a JSON response body.
pub(crate) async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    service: &'static str,
) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
        service,
        message: e.to_string(),
    })
}
