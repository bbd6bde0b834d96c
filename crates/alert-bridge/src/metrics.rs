//! Metrics hooks.
//!
//! The bridge only exposes the hook; [`TracingMetrics`] emits counters as
//! structured log events for whatever log pipeline is attached.

use tracing::info;

use crate::events::Source;

const PREFIX: &str = "alert_bridge";

/// Which side of the queue observed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Producer,
    Consumer,
}

impl Component {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// Counter sink.
pub trait MetricsSink: Send + Sync {
    /// A task was filed for `team`.
    fn increment_ticket_count(&self, team: &str, source: Source);

    /// An event was observed. `kind` is `None` when the source could not be
    /// determined.
    fn increment_event_count(&self, kind: Option<Source>, component: Component, valid: bool);
}

/// Emits counters as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment_ticket_count(&self, team: &str, source: Source) {
        info!(
            metric = %format!("{PREFIX}.ticket.count"),
            value = 1,
            team,
            kind = %source,
            "metric"
        );
    }

    fn increment_event_count(&self, kind: Option<Source>, component: Component, valid: bool) {
        let kind = kind.map_or_else(|| "unknown".to_string(), |k| k.to_string());
        info!(
            metric = %format!("{PREFIX}.event.count"),
            value = 1,
            kind = %kind,
            component = component.as_str(),
            valid,
            "metric"
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_ticket_count(&self, _team: &str, _source: Source) {}

    fn increment_event_count(&self, _kind: Option<Source>, _component: Component, _valid: bool) {}
}
