//! Cold start: builds every service once and hands back the wired graph.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clients::{AsanaClient, DatadogClient, SentryClient, TaskTracker};
use crate::compose::{ProjectIndex, TaskComposer};
use crate::config::Config;
use crate::consumer::{Consumer, ConsumerDeps};
use crate::events::Extractor;
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::producer::Producer;
use crate::queue::{LocalQueue, QueueWorker};
use crate::secrets::{
    ConsumerSecrets, EnvSecretStore, FileSecretStore, ProducerSecrets, SecretStore,
};
use crate::server::AppState;
use crate::teams::TeamDirectory;

/// The wired service graph.
pub struct Wired {
    pub state: AppState,
    pub worker: QueueWorker,
    pub directory: Arc<TeamDirectory>,
    /// Absent when the refresh interval is zero.
    pub refresher: Option<ProjectRefresher>,
}

/// Re-resolves portfolio projects so sprint rollovers are picked up
/// without a restart.
pub struct ProjectRefresher {
    tracker: Arc<dyn TaskTracker>,
    portfolios: Vec<String>,
    index: Arc<RwLock<ProjectIndex>>,
    interval: Duration,
}

impl ProjectRefresher {
    #[must_use]
    pub fn new(
        tracker: Arc<dyn TaskTracker>,
        portfolios: Vec<String>,
        index: Arc<RwLock<ProjectIndex>>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            portfolios,
            index,
            interval,
        }
    }

    /// Resolve every portfolio once and merge the result into the shared
    /// index. Portfolios that fail keep their last known project.
    pub async fn refresh_once(&self) {
        let fresh = resolve_projects(self.tracker.as_ref(), self.portfolios.clone()).await;
        self.index.write().await.absorb(fresh);
        debug!("Project index refreshed");
    }

    /// Refresh forever on the configured interval.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Project refresher started");
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; cold start already resolved.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.refresh_once().await;
        }
    }
}

/// Secret store selected by configuration.
#[must_use]
pub fn secret_store(config: &Config) -> Box<dyn SecretStore> {
    match &config.secrets_dir {
        Some(dir) => Box::new(FileSecretStore::new(dir)),
        None => Box::new(EnvSecretStore),
    }
}

/// Resolve the newest project of every portfolio concurrently.
///
/// Portfolios that fail to resolve are left out; task routing falls back
/// to the default project for them.
pub async fn resolve_projects(tracker: &dyn TaskTracker, portfolios: Vec<String>) -> ProjectIndex {
    let lookups = portfolios.iter().map(|p| tracker.latest_project(p));
    let results = join_all(lookups).await;

    let mut index = ProjectIndex::new();
    for (portfolio, result) in portfolios.iter().zip(results) {
        match result {
            Ok(Some(project)) => index.insert(portfolio.clone(), project),
            Ok(None) => warn!(portfolio = %portfolio, "Portfolio has no live project"),
            Err(e) => warn!(portfolio = %portfolio, error = %e, "Failed to resolve portfolio"),
        }
    }
    info!(
        resolved = index.len(),
        total = portfolios.len(),
        "Resolved current projects"
    );
    index
}

/// Build the producer, consumer and queue from configuration.
///
/// Any directory or secret failure is fatal: the service must not serve
/// traffic without them.
pub async fn wire(config: &Config) -> Result<Wired> {
    config.validate()?;

    let directory = Arc::new(
        TeamDirectory::load(&config.teams_file)
            .with_context(|| format!("Failed to load team directory {}", config.teams_file))?,
    );

    let secret = secret_store(config)
        .get_secret(&config.secret_name)
        .await
        .context("Failed to fetch secrets")?;
    let producer_secrets = ProducerSecrets::from_map(&config.secret_name, &secret)?;
    let consumer_secrets = ConsumerSecrets::from_map(&config.secret_name, &secret)?;

    let sentry = Arc::new(SentryClient::new(
        &consumer_secrets.sentry_pat,
        &config.endpoints.sentry_api,
    )?);
    let datadog = Arc::new(DatadogClient::new(
        &consumer_secrets.datadog_api_key,
        &consumer_secrets.datadog_app_key,
        &config.endpoints.datadog_api,
    )?);
    let asana = Arc::new(AsanaClient::new(
        &consumer_secrets.asana_pat,
        &config.endpoints.asana_api,
    )?);

    let mut portfolios = directory.portfolios();
    portfolios.extend(config.projects.release_portfolio.clone());
    portfolios.sort();
    portfolios.dedup();
    let projects = Arc::new(RwLock::new(
        resolve_projects(asana.as_ref(), portfolios.clone()).await,
    ));

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let (queue, worker) = LocalQueue::new(&config.queue);

    let consumer = Consumer::new(ConsumerDeps {
        extractor: Extractor::new(directory.clone(), config.endpoints.sentry_org.clone()),
        composer: TaskComposer::new(config, &directory),
        projects: projects.clone(),
        sentry,
        datadog,
        tracker: asana.clone(),
        metrics: metrics.clone(),
    });
    let refresher = (!config.project_refresh.is_zero()).then(|| {
        ProjectRefresher::new(asana, portfolios, projects, config.project_refresh)
    });
    let producer = Producer::new(
        producer_secrets,
        Arc::new(queue),
        metrics,
        config.development,
    );

    Ok(Wired {
        state: AppState { producer, consumer },
        worker,
        directory,
        refresher,
    })
}
