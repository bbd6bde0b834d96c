//! Queue consumer: turns queued webhook bodies into filed tasks.
//!
//! Each message walks RECEIVED → LINK_LOOKUP → ROOT_LOOKUP → TASK_CREATE →
//! LINK_WRITE. A failure at any stage fails only that message. If the link
//! write-back fails the created task is kept, so a redelivery can file a
//! duplicate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clients::{task_gid_from_link, CreatedTask, LinkStore, TaskTracker};
use crate::compose::{parse_root_link, ProjectIndex, TaskComposer, TaskLinkChain};
use crate::error::{FailureCause, ProcessError};
use crate::events::{CanonicalEvent, Extractor, Source};
use crate::metrics::{Component, MetricsSink};
use crate::queue::{BatchEvent, BatchHandler, BatchResponse, QueueRecord};

/// Per-message processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    LinkLookup,
    RootLookup,
    TaskCreate,
    LinkWrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::LinkLookup => "LINK_LOOKUP",
            Self::RootLookup => "ROOT_LOOKUP",
            Self::TaskCreate => "TASK_CREATE",
            Self::LinkWrite => "LINK_WRITE",
        };
        f.write_str(name)
    }
}

/// A successfully filed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filed {
    pub task: CreatedTask,
    pub team: String,
    pub chain: TaskLinkChain,
}

/// Everything the consumer is built from.
pub struct ConsumerDeps {
    pub extractor: Extractor,
    pub composer: TaskComposer,
    /// Shared with the refresher that rolls projects over.
    pub projects: Arc<RwLock<ProjectIndex>>,
    pub sentry: Arc<dyn LinkStore>,
    pub datadog: Arc<dyn LinkStore>,
    pub tracker: Arc<dyn TaskTracker>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Batch consumer. Cheap to clone.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerDeps>,
}

impl Consumer {
    #[must_use]
    pub fn new(deps: ConsumerDeps) -> Self {
        Self {
            inner: Arc::new(deps),
        }
    }

    fn link_store(&self, source: Source) -> &dyn LinkStore {
        match source {
            Source::Sentry => self.inner.sentry.as_ref(),
            Source::Datadog => self.inner.datadog.as_ref(),
        }
    }

    /// Process one message through every stage.
    pub async fn process(&self, record: &QueueRecord) -> Result<Filed, ProcessError> {
        let deps = &*self.inner;

        // RECEIVED
        let received = Self::receive(deps, record);
        deps.metrics.increment_event_count(
            record.source().ok(),
            Component::Consumer,
            received.is_ok(),
        );
        let (source, event) = received?;
        let key = event
            .link_key
            .clone()
            .ok_or_else(|| ProcessError::new(Stage::Received, FailureCause::MissingLinkKey))?;
        let store = self.link_store(source);

        // LINK_LOOKUP
        let previous = store
            .find_task_link(&key)
            .await
            .map_err(|e| ProcessError::new(Stage::LinkLookup, e))?;

        // ROOT_LOOKUP
        let root = match &previous {
            Some(link) => self.root_link(link).await?.or_else(|| previous.clone()),
            None => None,
        };
        let chain = TaskLinkChain { root, previous };

        // TASK_CREATE
        let task = self.create_task(&event, &chain).await?;
        deps.metrics
            .increment_ticket_count(&event.team.name, source);

        // LINK_WRITE
        if let Err(e) = store.write_task_link(&key, &task).await {
            error!(
                message_id = %record.message_id,
                task_gid = %task.gid,
                link_key = %key,
                error = %e,
                "Task created but link write-back failed; task is kept"
            );
            return Err(ProcessError::new(Stage::LinkWrite, e));
        }

        Ok(Filed {
            task,
            team: event.team.name,
            chain,
        })
    }

    fn receive(
        deps: &ConsumerDeps,
        record: &QueueRecord,
    ) -> Result<(Source, CanonicalEvent), ProcessError> {
        let source = record
            .source()
            .map_err(|e| ProcessError::new(Stage::Received, e))?;
        let payload: Value = serde_json::from_str(&record.body)
            .map_err(|e| ProcessError::new(Stage::Received, e))?;
        Ok((source, deps.extractor.extract(source, &payload)))
    }

    /// Root link recorded in the notes of the previous task.
    async fn root_link(&self, previous: &str) -> Result<Option<String>, ProcessError> {
        let Some(gid) = task_gid_from_link(previous) else {
            warn!(link = %previous, "Linked task URL has no task id");
            return Ok(None);
        };
        let notes = self
            .inner
            .tracker
            .task_notes(&gid)
            .await
            .map_err(|e| ProcessError::new(Stage::RootLookup, e))?;
        Ok(notes.as_deref().and_then(parse_root_link))
    }

    /// Compose and create the task, retrying once without team-specific
    /// fields if the tracker rejects an enum value.
    async fn create_task(
        &self,
        event: &CanonicalEvent,
        chain: &TaskLinkChain,
    ) -> Result<CreatedTask, ProcessError> {
        let deps = &*self.inner;
        let resolution = {
            let projects = deps.projects.read().await;
            deps.composer.resolve_projects(event, &projects)
        };
        let note = deps.composer.compose_note(event, chain, Utc::now());
        let body = deps.composer.compose_body(event, note, resolution);

        match deps.tracker.create_task(&body).await {
            Ok(task) => Ok(task),
            Err(e) if e.is_enum_rejection() => {
                warn!(error = %e, team = %event.team.name, "Task rejected, retrying with reduced fields");
                let reduced = deps.composer.degrade(&body, &e.to_string());
                deps.tracker
                    .create_task(&reduced)
                    .await
                    .map_err(|e| ProcessError::new(Stage::TaskCreate, e))
            }
            Err(e) => Err(ProcessError::new(Stage::TaskCreate, e)),
        }
    }

    /// Process every record concurrently and report the failed ones.
    ///
    /// A record whose task never reports back (a panic) counts as failed.
    pub async fn handle_batch(&self, batch: BatchEvent) -> BatchResponse {
        let ids: Vec<String> = batch
            .records
            .iter()
            .map(|r| r.message_id.clone())
            .collect();
        let mut succeeded = vec![false; ids.len()];

        let mut join_set = JoinSet::new();
        for (idx, record) in batch.records.into_iter().enumerate() {
            let consumer = self.clone();
            join_set.spawn(async move {
                let result = consumer.process(&record).await;
                (idx, record.message_id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, message_id, Ok(filed))) => {
                    info!(
                        message_id = %message_id,
                        task_gid = %filed.task.gid,
                        team = %filed.team,
                        "Message processed"
                    );
                    succeeded[idx] = true;
                }
                Ok((_, message_id, Err(e))) => {
                    error!(
                        message_id = %message_id,
                        stage = %e.stage,
                        error = %e,
                        "Message failed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Message task did not complete");
                }
            }
        }

        BatchResponse::from_failures(
            ids.into_iter()
                .zip(succeeded)
                .filter(|(_, ok)| !ok)
                .map(|(id, _)| id),
        )
    }
}

#[async_trait]
impl BatchHandler for Consumer {
    async fn handle_batch(&self, batch: BatchEvent) -> BatchResponse {
        Consumer::handle_batch(self, batch).await
    }
}
