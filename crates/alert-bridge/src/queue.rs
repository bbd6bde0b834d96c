//! Queue message contract and the in-process queue.
//!
//! The batch types mirror the queue-trigger contract: a batch of
//! `records[]` in, `batchItemFailures[]` out. Only failed message ids are
//! reported; everything else counts as acknowledged.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{FailureCause, QueueError};
use crate::events::Source;

/// Message attribute carrying the alert source.
pub const ALERT_TYPE_ATTRIBUTE: &str = "AlertType";

/// A typed message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttribute {
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default = "string_type")]
    pub data_type: String,
}

fn string_type() -> String {
    "String".to_string()
}

/// One queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub message_attributes: HashMap<String, MessageAttribute>,
}

impl QueueRecord {
    /// Build a record tagged with its source.
    #[must_use]
    pub fn new(message_id: impl Into<String>, body: impl Into<String>, source: Source) -> Self {
        let mut message_attributes = HashMap::new();
        message_attributes.insert(
            ALERT_TYPE_ATTRIBUTE.to_string(),
            MessageAttribute {
                string_value: Some(source.as_attribute().to_string()),
                data_type: string_type(),
            },
        );
        Self {
            message_id: message_id.into(),
            body: body.into(),
            message_attributes,
        }
    }

    /// Source recorded by the producer.
    pub fn source(&self) -> Result<Source, FailureCause> {
        let value = self
            .message_attributes
            .get(ALERT_TYPE_ATTRIBUTE)
            .and_then(|a| a.string_value.as_deref())
            .ok_or(FailureCause::MissingSource)?;
        value
            .parse()
            .map_err(FailureCause::UnknownSource)
    }
}

/// A delivered batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(alias = "Records")]
    pub records: Vec<QueueRecord>,
}

/// A message that must be redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Result of handling a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    #[must_use]
    pub fn from_failures(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            batch_item_failures: ids
                .into_iter()
                .map(|item_identifier| BatchItemFailure { item_identifier })
                .collect(),
        }
    }

    /// Failed message ids.
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
    }
}

/// Producer side of the queue.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Enqueue a raw webhook body; returns the message id.
    async fn enqueue(&self, body: String, source: Source) -> Result<String, QueueError>;
}

/// Consumer side of the queue.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: BatchEvent) -> BatchResponse;
}

#[derive(Debug)]
struct Delivery {
    record: QueueRecord,
    receive_count: u32,
}

/// Bounded in-process queue.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    tx: mpsc::Sender<Delivery>,
}

/// Drains a [`LocalQueue`] into a [`BatchHandler`].
#[derive(Debug)]
pub struct QueueWorker {
    rx: mpsc::Receiver<Delivery>,
    pending: VecDeque<Delivery>,
    config: QueueConfig,
}

impl LocalQueue {
    /// Create the queue and the worker that drains it.
    #[must_use]
    pub fn new(config: &QueueConfig) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        (
            Self { tx },
            QueueWorker {
                rx,
                pending: VecDeque::new(),
                config: config.clone(),
            },
        )
    }
}

#[async_trait]
impl EventQueue for LocalQueue {
    async fn enqueue(&self, body: String, source: Source) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let delivery = Delivery {
            record: QueueRecord::new(message_id.clone(), body, source),
            receive_count: 0,
        };
        self.tx.try_send(delivery).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        debug!(message_id = %message_id, source = %source, "Enqueued event");
        Ok(message_id)
    }
}

impl QueueWorker {
    /// Deliver batches until every producer handle is dropped and nothing
    /// is left to redeliver.
    pub async fn run<H: BatchHandler + ?Sized>(mut self, handler: &H) {
        info!(
            batch_size = self.config.batch_size,
            max_receive_count = self.config.max_receive_count,
            "Queue worker started"
        );
        while let Some(batch) = self.next_batch().await {
            self.deliver(handler, batch).await;
        }
        info!("Queue worker stopped");
    }

    /// Collect up to `batch_size` deliveries, waiting at most one batch
    /// window once the first delivery is in hand.
    async fn next_batch(&mut self) -> Option<Vec<Delivery>> {
        let size = self.config.batch_size.max(1);
        let mut batch: Vec<Delivery> = Vec::with_capacity(size);

        while batch.len() < size {
            match self.pending.pop_front() {
                Some(d) => batch.push(d),
                None => break,
            }
        }

        if batch.is_empty() {
            batch.push(self.rx.recv().await?);
        }

        let deadline = Instant::now() + self.config.batch_window;
        while batch.len() < size {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(d)) => batch.push(d),
                Ok(None) | Err(_) => break,
            }
        }
        Some(batch)
    }

    async fn deliver<H: BatchHandler + ?Sized>(&mut self, handler: &H, batch: Vec<Delivery>) {
        let records = batch.iter().map(|d| d.record.clone()).collect();
        let response = handler.handle_batch(BatchEvent { records }).await;
        let failed: std::collections::HashSet<&str> = response.failed_ids().collect();

        for mut delivery in batch {
            if !failed.contains(delivery.record.message_id.as_str()) {
                continue;
            }
            delivery.receive_count += 1;
            if delivery.receive_count >= self.config.max_receive_count {
                error!(
                    message_id = %delivery.record.message_id,
                    receive_count = delivery.receive_count,
                    body = %delivery.record.body,
                    "Message exceeded max receive count, dead-lettering"
                );
                continue;
            }
            warn!(
                message_id = %delivery.record.message_id,
                receive_count = delivery.receive_count,
                "Redelivering failed message"
            );
            self.pending.push_back(delivery);
        }
    }
}
