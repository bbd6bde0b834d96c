use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{string_field, Priority, RawEvent};

/// Extract fields from a Datadog monitor webhook.
///
/// Expected template fields: `id`, `title`, `date` (epoch ms), `priority`,
/// `tags` (`"k:v,k2:v2"`), `link` and `alert_id`.
pub(super) fn extract(payload: &Value) -> RawEvent {
    let mut tags = string_field(payload, "tags")
        .map(|t| split_tags(&t))
        .unwrap_or_default();

    if let Some(alert_id) = string_field(payload, "alert_id") {
        tags.entry("monitor_id".to_string()).or_insert(alert_id);
    }

    let environment = tags
        .get("env")
        .or_else(|| tags.get("environment"))
        .cloned();

    RawEvent {
        link_key: tags.get("monitor_id").cloned(),
        environment,
        event_time: string_field(payload, "date").and_then(|d| epoch_ms(&d)),
        title: string_field(payload, "title"),
        priority: string_field(payload, "priority").map(|p| priority(&p)),
        url: string_field(payload, "link"),
        tags,
    }
}

/// `p3`, `p4` and `p5` are filed as MEDIUM, everything else as HIGH.
pub(super) fn priority(priority: &str) -> Priority {
    match priority.trim().to_ascii_lowercase().as_str() {
        "p3" | "p4" | "p5" => Priority::Medium,
        _ => Priority::High,
    }
}

/// Split `"k:v,k2:v2"`. A tag without a colon maps to an empty value.
pub(super) fn split_tags(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once(':') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (t.to_string(), String::new()),
        })
        .collect()
}

fn epoch_ms(raw: &str) -> Option<DateTime<Utc>> {
    let ms: i64 = raw.trim().parse().ok()?;
    DateTime::from_timestamp_millis(ms)
}
