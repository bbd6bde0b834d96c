//! Task composition: notes, custom fields and target projects.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{Config, NoteConfig, ProjectConfig};
use crate::events::{CanonicalEvent, Priority};
use crate::teams::{TaskFieldIds, TeamDirectory};

const ROOT_MARKER: &str = "Root Task: ";
const PREVIOUS_MARKER: &str = "Previous Task: ";

/// Tags carrying a request id that can be looked up in APM.
const REQUEST_ID_TAGS: [&str; 2] = ["request_id", "zap_lambdaRequestId"];

const INCIDENT_LOOKBACK_DAYS: i64 = 180;

/// Links to earlier tasks filed for the same upstream issue.
///
/// Recovered live from the upstream providers on every run; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLinkChain {
    /// First task ever filed for the issue.
    pub root: Option<String>,
    /// Most recently filed task.
    pub previous: Option<String>,
}

/// Newest project of each portfolio. Resolved at cold start and refreshed
/// periodically while the service runs.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    latest: HashMap<String, String>,
}

impl ProjectIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, portfolio: impl Into<String>, project: impl Into<String>) {
        self.latest.insert(portfolio.into(), project.into());
    }

    /// Current project of a portfolio, if it resolved.
    #[must_use]
    pub fn latest(&self, portfolio: Option<&str>) -> Option<String> {
        portfolio.and_then(|p| self.latest.get(p).cloned())
    }

    /// Take every entry of a newer resolution. Portfolios missing from it
    /// keep their previous project.
    pub fn absorb(&mut self, newer: ProjectIndex) {
        self.latest.extend(newer.latest);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Where a task will be filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResolution {
    pub projects: Vec<String>,
    /// Set when the preferred projects did not resolve.
    pub degraded: Option<String>,
}

/// Body of an Asana task create request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskInput {
    pub name: String,
    pub projects: Vec<String>,
    pub custom_fields: BTreeMap<String, Value>,
    pub notes: String,
}

/// Builds task notes and bodies from canonical events.
#[derive(Debug, Clone)]
pub struct TaskComposer {
    notes: NoteConfig,
    projects: ProjectConfig,
    fields: TaskFieldIds,
    datadog_app: String,
    default_project: String,
    development: bool,
}

impl TaskComposer {
    #[must_use]
    pub fn new(config: &Config, directory: &TeamDirectory) -> Self {
        let default_project = config
            .projects
            .default_project
            .clone()
            .unwrap_or_else(|| directory.fallback().backlog_project.clone());

        Self {
            notes: config.notes.clone(),
            projects: config.projects.clone(),
            fields: directory.task_fields().clone(),
            datadog_app: config.endpoints.datadog_app.trim_end_matches('/').to_string(),
            default_project,
            development: config.development,
        }
    }

    /// Assemble task notes.
    ///
    /// Order is fixed: previous task, root task, event summary, switch-role
    /// link, trace or log link, incident history, routing explanation.
    #[must_use]
    pub fn compose_note(
        &self,
        event: &CanonicalEvent,
        chain: &TaskLinkChain,
        now: DateTime<Utc>,
    ) -> String {
        let mut note = String::new();

        if let Some(previous) = &chain.previous {
            note.push_str(&format!("{PREVIOUS_MARKER}{previous}\n\n"));
        }
        if let Some(root) = &chain.root {
            note.push_str(&format!("{ROOT_MARKER}{root}\n\n"));
        }

        note.push_str(&format!("Source URL: {}\n\n", event.url));
        note.push_str(&format!("Event Time: {}\n\n", event.event_time_iso()));
        note.push_str(&format!("Customer Impacted: {}\n\n", event.customer));
        note.push_str(&format!("Environment: {}\n\n", event.environment));
        note.push_str(&format!("Runbook: {}\n\n", self.notes.runbook_url));

        if let Some(link) = self.switch_role_link(event) {
            note.push_str(&format!("AWS Switch Role Link: {link}\n\n"));
        }

        note.push_str(&self.diagnostics_line(event, now));

        if let Some(link) = self.incident_history_link(event, now) {
            note.push_str(&format!("Incident History: {link}\n\n"));
        }

        note.push_str(&event.routing);
        note
    }

    /// Build the create request from an event, its notes and target projects.
    #[must_use]
    pub fn compose_body(
        &self,
        event: &CanonicalEvent,
        note: String,
        resolution: ProjectResolution,
    ) -> TaskInput {
        let mut custom_fields = BTreeMap::new();

        let priority_value = match event.priority {
            Priority::High => self.fields.priority_high.as_ref(),
            Priority::Medium => self.fields.priority_medium.as_ref(),
        };
        if let (Some(field), Some(value)) = (&self.fields.priority, priority_value) {
            custom_fields.insert(field.clone(), json!(value));
        }
        if let (Some(field), Some(value)) = (&self.fields.reporter, &self.fields.reporter_value) {
            custom_fields.insert(field.clone(), json!(value));
        }
        if let (Some(field), Some(value)) = (&self.fields.task_type, &self.fields.task_type_value) {
            custom_fields.insert(field.clone(), json!(value));
        }
        if let Some(field) = &self.fields.estimate {
            custom_fields.insert(field.clone(), json!(0.1));
        }
        if let Some(field) = &self.fields.team {
            custom_fields.insert(field.clone(), json!(event.team.team_id));
        }

        let notes = match resolution.degraded {
            Some(reason) => format!("{note}\n\n{reason}"),
            None => note,
        };

        TaskInput {
            name: event.title.clone(),
            projects: resolution.projects,
            custom_fields,
            notes,
        }
    }

    /// Reduced request for a retry after Asana rejected an enum value.
    ///
    /// Drops the team field and records why in the notes.
    #[must_use]
    pub fn degrade(&self, task: &TaskInput, reason: &str) -> TaskInput {
        let mut reduced = task.clone();
        if let Some(field) = &self.fields.team {
            reduced.custom_fields.remove(field);
        }
        reduced.notes = format!(
            "{}\n\nDegraded: team-specific fields were dropped after the task tracker rejected the request ({reason})",
            task.notes
        );
        reduced
    }

    /// Pick the projects a task is filed to.
    ///
    /// - development mode or a dev environment: team sandbox plus the global dev project
    /// - staging: team sprint plus current release-testing, else the default project
    /// - production MEDIUM: team backlog
    /// - production HIGH: team sprint, else the default project
    #[must_use]
    pub fn resolve_projects(
        &self,
        event: &CanonicalEvent,
        index: &ProjectIndex,
    ) -> ProjectResolution {
        let team = &event.team;
        let environment = event.environment.as_str();

        if self.development || matches!(environment, "dev" | "development") {
            let projects: Vec<String> = [
                index.latest(team.sandbox_portfolio.as_deref()),
                self.projects.dev_project.clone(),
            ]
            .into_iter()
            .flatten()
            .collect();
            return self.or_default(projects, "No sandbox or dev project resolved");
        }

        if environment == "staging" {
            let projects: Vec<String> = [
                index.latest(team.sprint_portfolio.as_deref()),
                index.latest(self.projects.release_portfolio.as_deref()),
            ]
            .into_iter()
            .flatten()
            .collect();
            return self.or_default(
                projects,
                &format!("No current sprint or release-testing project resolved for {}", team.name),
            );
        }

        if event.priority == Priority::Medium {
            return ProjectResolution {
                projects: vec![team.backlog_project.clone()],
                degraded: None,
            };
        }

        let projects: Vec<String> = index
            .latest(team.sprint_portfolio.as_deref())
            .into_iter()
            .collect();
        self.or_default(
            projects,
            &format!("No current sprint project resolved for {}", team.name),
        )
    }

    fn or_default(&self, projects: Vec<String>, reason: &str) -> ProjectResolution {
        if !projects.is_empty() {
            debug!(projects = ?projects, "Resolved task projects");
            return ProjectResolution {
                projects,
                degraded: None,
            };
        }
        warn!(default_project = %self.default_project, reason, "Falling back to default project");
        ProjectResolution {
            projects: vec![self.default_project.clone()],
            degraded: Some(format!("Degraded: {reason}; filed to the default project.")),
        }
    }

    fn switch_role_link(&self, event: &CanonicalEvent) -> Option<String> {
        if !event.has_aws_account()
            || self
                .notes
                .self_hosted_accounts
                .iter()
                .any(|a| *a == event.aws_account_id)
        {
            return None;
        }
        let region = &event.aws_region;
        Some(format!(
            "https://{region}.signin.aws.amazon.com/switchrole?roleName={role}-{region}&account={account}&displayName={name}%20Support",
            role = self.notes.support_role,
            account = event.aws_account_id,
            name = urlencoding::encode(&event.customer),
        ))
    }

    /// Trace link when a request id is tagged, log search otherwise.
    fn diagnostics_line(&self, event: &CanonicalEvent, now: DateTime<Utc>) -> String {
        let request_id = REQUEST_ID_TAGS
            .iter()
            .find_map(|key| event.tags.get(*key).filter(|v| !v.is_empty()));

        if let Some(id) = request_id {
            let start = event.event_time - Duration::hours(1);
            return format!(
                "Trace Link: {}/apm/traces?query={}&start={}&end={}\n\n",
                self.datadog_app,
                urlencoding::encode(&format!("@request_id:{id}")),
                start.timestamp_millis(),
                now.timestamp_millis(),
            );
        }

        let query = event
            .tags
            .get("server_name")
            .or_else(|| event.tags.get("function_name"))
            .filter(|v| !v.is_empty())
            .map_or_else(|| "*".to_string(), |name| format!("service:{name}"));
        let from = event.event_time - Duration::hours(3);
        let to = event.event_time + Duration::hours(1);
        format!(
            "Log Search Link: {}/logs?query={}&from_ts={}&to_ts={}\n\n",
            self.datadog_app,
            urlencoding::encode(&query),
            from.timestamp_millis(),
            to.timestamp_millis(),
        )
    }

    fn incident_history_link(&self, event: &CanonicalEvent, now: DateTime<Utc>) -> Option<String> {
        let monitor_id = event.tags.get("monitor_id").filter(|v| !v.is_empty())?;
        let from = now - Duration::days(INCIDENT_LOOKBACK_DAYS);
        Some(format!(
            "{}/event/explorer?query={}&from_ts={}&to_ts={}",
            self.datadog_app,
            urlencoding::encode(&format!("tags:monitor_id:{monitor_id}")),
            from.timestamp_millis(),
            now.timestamp_millis(),
        ))
    }
}

/// Find the root task link in existing task notes.
#[must_use]
pub fn parse_root_link(notes: &str) -> Option<String> {
    let start = notes.find(ROOT_MARKER)? + ROOT_MARKER.len();
    let link: String = notes[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    (!link.is_empty()).then_some(link)
}
