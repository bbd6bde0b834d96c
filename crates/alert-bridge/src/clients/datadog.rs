//! Datadog events API client.
//!
//! Datadog has no native "linked task" field on a monitor, so links are
//! stored as events tagged with the monitor id and read back by tag search.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{decode, ensure_success, CreatedTask, LinkStore};
use crate::error::ClientError;

const SERVICE: &str = "datadog";

/// Custom event source type accepted by the events API.
pub const SOURCE_TYPE: &str = "my_apps";

/// Tag marking events written by this bridge.
pub const EVENT_SOURCE_TAG: &str = "event_source:asana";

/// Prefix of the task link inside link event text.
const LINK_PREFIX: &str = "Asana Task: ";

const LOOKBACK_DAYS: i64 = 180;

/// Datadog REST client.
#[derive(Debug, Clone)]
pub struct DatadogClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

#[derive(Debug, Serialize)]
struct EventRequest<'a> {
    title: String,
    text: String,
    tags: Vec<String>,
    source_type_name: &'a str,
    alert_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    date_happened: i64,
}

impl DatadogClient {
    pub fn new(api_key: &str, app_key: &str, base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            app_key: app_key.to_string(),
        })
    }

    fn monitor_tags(monitor_id: &str) -> Vec<String> {
        vec![format!("monitor_id:{monitor_id}"), EVENT_SOURCE_TAG.to_string()]
    }

    /// Most recent task link recorded for a monitor.
    #[instrument(skip(self), fields(monitor_id = %monitor_id))]
    pub async fn latest_link(&self, monitor_id: &str) -> Result<Option<String>, ClientError> {
        let end = Utc::now();
        let start = end - Duration::days(LOOKBACK_DAYS);
        let url = format!("{}/api/v1/events", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
            .query(&[
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("tags", Self::monitor_tags(monitor_id).join(",")),
            ])
            .send()
            .await?;
        let list: EventList = decode(ensure_success(response, SERVICE).await?, SERVICE).await?;

        Ok(list
            .events
            .into_iter()
            .filter_map(|e| {
                let link = e.text.as_deref().and_then(parse_link)?;
                Some((e.date_happened, link))
            })
            .max_by_key(|(when, _)| *when)
            .map(|(_, link)| link))
    }

    /// Post a link event for a monitor.
    #[instrument(skip(self, task), fields(monitor_id = %monitor_id, task_gid = %task.gid))]
    pub async fn post_link(&self, monitor_id: &str, task: &CreatedTask) -> Result<(), ClientError> {
        let url = format!("{}/api/v1/events", self.base_url);
        let request = EventRequest {
            title: format!("Asana task filed for monitor {monitor_id}"),
            text: format!("{LINK_PREFIX}{}", task.link()),
            tags: Self::monitor_tags(monitor_id),
            source_type_name: SOURCE_TYPE,
            alert_type: "info",
        };

        let response = self
            .client
            .post(&url)
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
            .json(&request)
            .send()
            .await?;
        ensure_success(response, SERVICE).await?;

        info!("Recorded Asana task on Datadog monitor");
        Ok(())
    }
}

fn parse_link(text: &str) -> Option<String> {
    let start = text.find(LINK_PREFIX)? + LINK_PREFIX.len();
    let link: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    (!link.is_empty()).then_some(link)
}

#[async_trait]
impl LinkStore for DatadogClient {
    async fn find_task_link(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.latest_link(key).await
    }

    async fn write_task_link(&self, key: &str, task: &CreatedTask) -> Result<(), ClientError> {
        self.post_link(key, task).await
    }
}
