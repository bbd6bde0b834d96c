//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{Notify, RwLock};

use alert_bridge::clients::{CreatedTask, LinkStore, TaskTracker};
use alert_bridge::compose::{ProjectIndex, TaskComposer, TaskInput};
use alert_bridge::config::{Config, NoteConfig, ProjectConfig};
use alert_bridge::consumer::{Consumer, ConsumerDeps};
use alert_bridge::events::{Extractor, Source};
use alert_bridge::metrics::NoopMetrics;
use alert_bridge::queue::QueueRecord;
use alert_bridge::{ClientError, TeamDirectory};

pub const DIRECTORY: &str = r#"
task_fields:
  priority: "f-priority"
  priority_high: "o-high"
  priority_medium: "o-medium"
  team: "f-team"
teams:
  - name: Observability
    team_id: t-obs
    backlog_project: p-obs-backlog
    sprint_portfolio: pf-obs
    default: true
  - name: Ingestion
    team_id: t-ing
    backlog_project: p-ing-backlog
    sprint_portfolio: pf-ing
    entities:
      - matchers: ["service:log-router"]
  - name: Detections
    team_id: t-det
    backlog_project: p-det-backlog
    sprint_portfolio: pf-det
    entities:
      - matchers: ["service:rules-engine"]
"#;

/// In-memory link store keyed by issue or monitor id.
#[derive(Default)]
pub struct FakeLinks {
    pub links: Mutex<HashMap<String, String>>,
    pub writes: Mutex<Vec<(String, String)>>,
    pub fail_find: bool,
    pub fail_write: bool,
}

impl FakeLinks {
    pub fn with_link(key: &str, link: &str) -> Self {
        let store = Self::default();
        store
            .links
            .lock()
            .unwrap()
            .insert(key.to_string(), link.to_string());
        store
    }
}

fn server_error(service: &'static str) -> ClientError {
    ClientError::Status {
        service,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "boom".into(),
    }
}

#[async_trait]
impl LinkStore for FakeLinks {
    async fn find_task_link(&self, key: &str) -> Result<Option<String>, ClientError> {
        if self.fail_find {
            return Err(server_error("links"));
        }
        Ok(self.links.lock().unwrap().get(key).cloned())
    }

    async fn write_task_link(&self, key: &str, task: &CreatedTask) -> Result<(), ClientError> {
        if self.fail_write {
            return Err(server_error("links"));
        }
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), task.gid.clone()));
        self.links
            .lock()
            .unwrap()
            .insert(key.to_string(), task.link());
        Ok(())
    }
}

/// In-memory task tracker.
#[derive(Default)]
pub struct FakeTracker {
    pub notes: Mutex<HashMap<String, String>>,
    pub created: Mutex<Vec<TaskInput>>,
    /// Task names whose creation fails.
    pub fail_names: HashSet<String>,
    /// Reject requests carrying the team field with an enum error.
    pub reject_team_field: bool,
    /// Task names whose creation waits for [`FakeTracker::release`].
    pub held_names: HashSet<String>,
    /// Task names whose creation panics.
    pub panic_names: HashSet<String>,
    release: Notify,
    next_gid: AtomicUsize,
}

impl FakeTracker {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: names.iter().map(|n| (*n).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn rejecting_team_field() -> Self {
        Self {
            reject_team_field: true,
            ..Self::default()
        }
    }

    /// Creation of `held` blocks until released, then fails if `held` is
    /// also in `failing`.
    pub fn holding(held: &str, failing: &[&str]) -> Self {
        Self {
            held_names: HashSet::from([held.to_string()]),
            ..Self::failing(failing)
        }
    }

    pub fn panicking(names: &[&str]) -> Self {
        Self {
            panic_names: names.iter().map(|n| (*n).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Let a held creation proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn created(&self) -> Vec<TaskInput> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskTracker for FakeTracker {
    async fn task_notes(&self, gid: &str) -> Result<Option<String>, ClientError> {
        Ok(self.notes.lock().unwrap().get(gid).cloned())
    }

    async fn create_task(&self, task: &TaskInput) -> Result<CreatedTask, ClientError> {
        if self.held_names.contains(&task.name) {
            self.release.notified().await;
        }
        if self.panic_names.contains(&task.name) {
            panic!("tracker crashed on {}", task.name);
        }
        if self.fail_names.contains(&task.name) {
            return Err(server_error("asana"));
        }
        if self.reject_team_field && task.custom_fields.contains_key("f-team") {
            return Err(ClientError::Rejected {
                service: "asana",
                message: "custom_fields: enum_value is not a valid enum option".into(),
            });
        }
        let gid = (1000 + self.next_gid.fetch_add(1, Ordering::SeqCst)).to_string();
        self.notes
            .lock()
            .unwrap()
            .insert(gid.clone(), task.notes.clone());
        self.created.lock().unwrap().push(task.clone());
        Ok(CreatedTask {
            permalink_url: Some(format!("https://app.asana.com/0/0/{gid}")),
            gid,
        })
    }

    async fn latest_project(&self, _portfolio: &str) -> Result<Option<String>, ClientError> {
        Ok(None)
    }
}

pub struct Harness {
    pub consumer: Consumer,
    pub sentry: Arc<FakeLinks>,
    pub datadog: Arc<FakeLinks>,
    pub tracker: Arc<FakeTracker>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.development = false;
    config.projects = ProjectConfig {
        dev_project: Some("p-dev".into()),
        release_portfolio: Some("pf-release".into()),
        default_project: Some("p-default".into()),
    };
    config.notes = NoteConfig {
        runbook_url: "https://runbooks.example/alerts".into(),
        support_role: "SupportRole".into(),
        self_hosted_accounts: Vec::new(),
    };
    config
}

pub fn harness(
    sentry: FakeLinks,
    datadog: FakeLinks,
    tracker: FakeTracker,
    projects: ProjectIndex,
) -> Harness {
    let directory = Arc::new(TeamDirectory::from_yaml_str(DIRECTORY).unwrap());
    let config = config();
    let sentry = Arc::new(sentry);
    let datadog = Arc::new(datadog);
    let tracker = Arc::new(tracker);

    let consumer = Consumer::new(ConsumerDeps {
        extractor: Extractor::new(directory.clone(), Some("acme".into())),
        composer: TaskComposer::new(&config, &directory),
        projects: Arc::new(RwLock::new(projects)),
        sentry: sentry.clone(),
        datadog: datadog.clone(),
        tracker: tracker.clone(),
        metrics: Arc::new(NoopMetrics),
    });

    Harness {
        consumer,
        sentry,
        datadog,
        tracker,
    }
}

pub fn sprint_index() -> ProjectIndex {
    let mut index = ProjectIndex::new();
    index.insert("pf-obs", "p-obs-sprint");
    index.insert("pf-ing", "p-ing-sprint");
    index.insert("pf-det", "p-det-sprint");
    index
}

pub fn sentry_body(issue_id: &str, title: &str, level: &str, service: &str) -> String {
    serde_json::json!({
        "data": {"event": {
            "issue_id": issue_id,
            "title": title,
            "level": level,
            "environment": "prod",
            "datetime": "2022-04-11T18:21:06Z",
            "tags": [
                ["service", service],
                ["aws_account_id", "123456789012"],
                ["aws_region", "us-west-2"],
                ["customer_name", "Acme Corp"]
            ]
        }}
    })
    .to_string()
}

pub fn sentry_record(message_id: &str, body: String) -> QueueRecord {
    QueueRecord::new(message_id, body, Source::Sentry)
}

pub fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(path).unwrap()
}
