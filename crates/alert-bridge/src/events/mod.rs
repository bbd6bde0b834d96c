//! Canonical alert events and the provider payload extractors.
//!
//! Extraction never fails: missing or malformed fields fall back to
//! documented defaults so sparse upstream tagging never blocks a ticket.

mod datadog;
mod sentry;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::teams::{EngTeam, TeamDirectory};

/// Placeholder for fields the payload did not carry.
pub const UNKNOWN: &str = "Unknown";

/// Which upstream provider produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Sentry,
    Datadog,
}

impl Source {
    /// Value of the `AlertType` queue message attribute.
    #[must_use]
    pub fn as_attribute(self) -> &'static str {
        match self {
            Self::Sentry => "SENTRY",
            Self::Datadog => "DATADOG",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentry => write!(f, "sentry"),
            Self::Datadog => write!(f, "datadog"),
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SENTRY" => Ok(Self::Sentry),
            "DATADOG" => Ok(Self::Datadog),
            _ => Err(s.to_string()),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
}

/// One alert normalized across providers.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub source: Source,
    /// Upstream id the task link is stored against: Sentry issue id or
    /// Datadog monitor id.
    pub link_key: Option<String>,
    pub team: EngTeam,
    pub aws_account_id: String,
    pub aws_region: String,
    pub customer: String,
    pub environment: String,
    pub event_time: DateTime<Utc>,
    pub title: String,
    pub priority: Priority,
    pub tags: BTreeMap<String, String>,
    /// Link back to the alert in the provider UI.
    pub url: String,
    pub routing: String,
}

impl CanonicalEvent {
    /// Whether the account tag was present.
    #[must_use]
    pub fn has_aws_account(&self) -> bool {
        self.aws_account_id != UNKNOWN && self.aws_region != UNKNOWN
    }

    /// Event time as ISO-8601 UTC with milliseconds.
    #[must_use]
    pub fn event_time_iso(&self) -> String {
        self.event_time
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// Provider-specific fields before team routing.
#[derive(Debug, Default)]
struct RawEvent {
    link_key: Option<String>,
    environment: Option<String>,
    event_time: Option<DateTime<Utc>>,
    title: Option<String>,
    priority: Option<Priority>,
    tags: BTreeMap<String, String>,
    url: Option<String>,
}

/// Turns raw provider payloads into routed canonical events.
#[derive(Debug, Clone)]
pub struct Extractor {
    directory: Arc<TeamDirectory>,
    sentry_org: Option<String>,
}

impl Extractor {
    #[must_use]
    pub fn new(directory: Arc<TeamDirectory>, sentry_org: Option<String>) -> Self {
        Self {
            directory,
            sentry_org,
        }
    }

    /// Extract and route a payload. Never fails.
    #[must_use]
    pub fn extract(&self, source: Source, payload: &Value) -> CanonicalEvent {
        let raw = match source {
            Source::Sentry => sentry::extract(payload, self.sentry_org.as_deref()),
            Source::Datadog => datadog::extract(payload),
        };
        self.finish(source, raw)
    }

    fn finish(&self, source: Source, raw: RawEvent) -> CanonicalEvent {
        let routed = self.directory.match_tags(&raw.tags);
        let tag = |key: &str| {
            raw.tags
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        CanonicalEvent {
            source,
            link_key: raw.link_key.clone(),
            team: routed.team.clone(),
            aws_account_id: tag("aws_account_id"),
            aws_region: tag("aws_region"),
            customer: tag("customer_name"),
            environment: raw
                .environment
                .clone()
                .map(|e| e.to_lowercase())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            event_time: raw.event_time.unwrap_or_else(Utc::now),
            title: raw.title.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            priority: raw.priority.unwrap_or(Priority::High),
            url: raw.url.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            routing: routed.explanation(),
            tags: raw.tags,
        }
    }
}

/// Read a field that may be a JSON string or number.
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
