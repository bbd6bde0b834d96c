//! Sentry issue API client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{decode, ensure_success, CreatedTask, LinkStore};
use crate::error::ClientError;

const SERVICE: &str = "sentry";

/// Sentry REST client.
#[derive(Debug, Clone)]
pub struct SentryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    #[serde(rename = "pluginIssues")]
    plugin_issues: Option<Vec<PluginIssue>>,
}

#[derive(Debug, Deserialize)]
struct PluginIssue {
    id: String,
    #[serde(default)]
    issue: Option<PluginLink>,
}

#[derive(Debug, Deserialize)]
struct PluginLink {
    url: Option<String>,
}

impl SentryClient {
    /// Create a client authenticated with a personal access token.
    pub fn new(token: &str, base_url: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Asana link recorded by the Sentry Asana plugin for an issue.
    ///
    /// Fails when the issue carries no plugin list or no Asana plugin; an
    /// installed plugin without a link yields `None`.
    #[instrument(skip(self), fields(issue_id = %issue_id))]
    pub async fn asana_link(&self, issue_id: &str) -> Result<Option<String>, ClientError> {
        let url = format!("{}/api/0/issues/{issue_id}/", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let issue: Issue = decode(ensure_success(response, SERVICE).await?, SERVICE).await?;

        let plugins = issue.plugin_issues.ok_or_else(|| ClientError::Decode {
            service: SERVICE,
            message: format!("issue {issue_id} has no pluginIssues"),
        })?;
        let asana = plugins
            .into_iter()
            .find(|p| p.id == "asana")
            .ok_or_else(|| ClientError::Decode {
                service: SERVICE,
                message: format!("issue {issue_id} has no asana plugin"),
            })?;

        let link = asana.issue.and_then(|i| i.url).filter(|u| !u.is_empty());
        if link.is_none() {
            debug!("No Asana link on issue");
        }
        Ok(link)
    }

    /// Attach an Asana task to an issue through the Asana plugin.
    #[instrument(skip(self), fields(issue_id = %issue_id, task_gid = %task_gid))]
    pub async fn link_task(&self, issue_id: &str, task_gid: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/0/issues/{issue_id}/plugins/asana/link/", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "issue_id": task_gid,
                "comment": "Linked by the alert bridge",
            }))
            .send()
            .await?;

        if let Err(e) = ensure_success(response, SERVICE).await {
            warn!(error = %e, "Failed to link Asana task to Sentry issue");
            return Err(e);
        }
        info!("Linked Asana task to Sentry issue");
        Ok(())
    }
}

#[async_trait]
impl LinkStore for SentryClient {
    async fn find_task_link(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.asana_link(key).await
    }

    async fn write_task_link(&self, key: &str, task: &CreatedTask) -> Result<(), ClientError> {
        self.link_task(key, &task.gid).await
    }
}
