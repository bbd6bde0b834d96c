//! Asana REST client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{decode, CreatedTask, TaskTracker};
use crate::compose::TaskInput;
use crate::error::ClientError;

const SERVICE: &str = "asana";
const PAGE_LIMIT: &str = "100";

/// Asana REST client.
#[derive(Debug, Clone)]
pub struct AsanaClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

// =========================================================================
// Wire types
// =========================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a, T> {
    data: &'a T,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskNotes {
    #[serde(default)]
    notes: Option<String>,
}

/// A portfolio item as returned with `opt_fields`.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioItem {
    pub gid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

impl AsanaClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        // Opt in to pending API changes and silence deprecation warnings
        headers.insert(
            "Asana-Enable",
            HeaderValue::from_static("new_user_task_lists,new_project_templates"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Send a request and map Asana error bodies.
    ///
    /// 400 responses carry `{"errors":[{"message":..}]}` and become
    /// [`ClientError::Rejected`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST {
            if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
                if !parsed.errors.is_empty() {
                    let message = parsed
                        .errors
                        .into_iter()
                        .map(|e| e.message)
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(ClientError::Rejected {
                        service: SERVICE,
                        message,
                    });
                }
            }
        }
        Err(ClientError::Status {
            service: SERVICE,
            status,
            body,
        })
    }

    /// All items of a portfolio, following pagination.
    #[instrument(skip(self), fields(portfolio = %portfolio))]
    pub async fn portfolio_items(&self, portfolio: &str) -> Result<Vec<PortfolioItem>, ClientError> {
        let url = format!("{}/portfolios/{portfolio}/items", self.base_url);
        let mut items = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![
                ("opt_fields", "name,resource_type,created_at,archived".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let response = self.send(self.client.get(&url).query(&query)).await?;
            let page: Envelope<Vec<PortfolioItem>> = decode(response, SERVICE).await?;
            items.extend(page.data);

            match page.next_page.and_then(|p| p.offset) {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(count = items.len(), "Fetched portfolio items");
        Ok(items)
    }
}

/// Newest live project among portfolio items. Ties go to the later item.
#[must_use]
pub fn latest_project(items: &[PortfolioItem]) -> Option<&PortfolioItem> {
    items
        .iter()
        .filter(|i| !i.archived && i.resource_type.as_deref() == Some("project"))
        .filter(|i| i.created_at.is_some())
        .max_by_key(|i| i.created_at)
}

#[async_trait]
impl TaskTracker for AsanaClient {
    #[instrument(skip(self), fields(task_gid = %gid))]
    async fn task_notes(&self, gid: &str) -> Result<Option<String>, ClientError> {
        let url = format!("{}/tasks/{gid}", self.base_url);
        let result = self
            .send(self.client.get(&url).query(&[("opt_fields", "notes")]))
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                warn!(error = %e, "Task is gone or private");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let task: Envelope<TaskNotes> = decode(response, SERVICE).await?;
        Ok(task.data.notes)
    }

    #[instrument(skip(self, task), fields(name = %task.name, projects = ?task.projects))]
    async fn create_task(&self, task: &TaskInput) -> Result<CreatedTask, ClientError> {
        let url = format!("{}/tasks", self.base_url);
        let response = self
            .send(
                self.client
                    .post(&url)
                    .query(&[("opt_fields", "permalink_url")])
                    .json(&RequestEnvelope { data: task }),
            )
            .await?;

        let created: Envelope<CreatedTask> = decode(response, SERVICE).await?;
        info!(task_gid = %created.data.gid, "Created Asana task");
        Ok(created.data)
    }

    async fn latest_project(&self, portfolio: &str) -> Result<Option<String>, ClientError> {
        let items = self.portfolio_items(portfolio).await?;
        Ok(latest_project(&items).map(|p| p.gid.clone()))
    }
}
