use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{string_field, Priority, RawEvent};

/// Extract fields from a Sentry issue-alert webhook.
///
/// The event lives under `data.event`; a bare event object is accepted too.
pub(super) fn extract(payload: &Value, org: Option<&str>) -> RawEvent {
    let event = payload
        .get("data")
        .and_then(|d| d.get("event"))
        .unwrap_or(payload);

    let link_key = string_field(event, "issue_id").or_else(|| {
        string_field(event, "issue_url").and_then(|url| {
            url.trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    });

    let url = string_field(event, "web_url").or_else(|| {
        match (org, link_key.as_deref()) {
            (Some(org), Some(id)) => {
                Some(format!("https://sentry.io/organizations/{org}/issues/{id}/"))
            }
            _ => None,
        }
    });

    let priority = string_field(event, "level").map(|level| priority(&level));

    RawEvent {
        link_key,
        environment: string_field(event, "environment"),
        event_time: string_field(event, "datetime").and_then(|s| parse_time(&s)),
        title: string_field(event, "title"),
        priority,
        tags: tags(event.get("tags")),
        url,
    }
}

/// `warning` is filed as MEDIUM, every other level as HIGH.
pub(super) fn priority(level: &str) -> Priority {
    if level.eq_ignore_ascii_case("warning") {
        Priority::Medium
    } else {
        Priority::High
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Tags arrive as `[key, value]` pairs or `{key, value}` objects.
fn tags(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Array(items)) = value else {
        return BTreeMap::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Array(pair) if pair.len() == 2 => {
                Some((pair[0].as_str()?.to_string(), scalar(&pair[1])?))
            }
            Value::Object(_) => Some((
                item.get("key")?.as_str()?.to_string(),
                scalar(item.get("value")?)?,
            )),
            _ => None,
        })
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
