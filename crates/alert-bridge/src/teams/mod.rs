//! Team directory: engineering teams and the tag matchers they own.
//!
//! The directory is loaded once at cold start from a YAML document and is
//! immutable afterwards. Loading fails when the document has no single
//! default team, declares the same matcher twice, or contains an invalid
//! matcher tag.
//!
//! Matcher tags are `key:value` (equal value), `key:/regex/` (pattern on the
//! value) or a bare `key`. A bare key is satisfied by any value of that key,
//! not only by equality, so `server_name` claims every event that reports a
//! server name.

pub mod matching;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DirectoryError;

pub use matching::{Candidate, TeamMatch};

/// Asana custom field ids set on every created task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFieldIds {
    /// Priority enum field.
    pub priority: Option<String>,
    pub priority_high: Option<String>,
    pub priority_medium: Option<String>,
    /// Team field. Dropped when Asana rejects an enum value.
    pub team: Option<String>,
    /// Reporter enum field and the option naming this bridge.
    pub reporter: Option<String>,
    pub reporter_value: Option<String>,
    /// Task type enum field and the on-call option.
    pub task_type: Option<String>,
    pub task_type_value: Option<String>,
    /// Estimate field, in days.
    pub estimate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryDocument {
    #[serde(default)]
    task_fields: TaskFieldIds,
    teams: Vec<TeamRecord>,
}

#[derive(Debug, Deserialize)]
struct TeamRecord {
    name: String,
    #[serde(default)]
    contact: String,
    team_id: String,
    backlog_project: String,
    #[serde(default)]
    sprint_portfolio: Option<String>,
    #[serde(default)]
    sandbox_portfolio: Option<String>,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    entities: Vec<EntityRecord>,
}

#[derive(Debug, Deserialize)]
struct EntityRecord {
    matchers: Vec<String>,
}

/// An engineering team that can own alerts.
#[derive(Debug, Clone)]
pub struct EngTeam {
    pub name: String,
    /// Where to reach the team (Slack channel, alias).
    pub contact: String,
    /// Asana team gid, written into the team custom field.
    pub team_id: String,
    pub backlog_project: String,
    /// Portfolio whose newest project is the team's current sprint.
    pub sprint_portfolio: Option<String>,
    /// Portfolio whose newest project is the team's sandbox board.
    pub sandbox_portfolio: Option<String>,
    pub entities: Vec<EntityMatcher>,
}

/// A set of tags that must all describe the same entity.
#[derive(Debug, Clone)]
pub struct EntityMatcher {
    pub tags: Vec<TagMatcher>,
    pub precedence: u8,
}

/// How a matcher tag compares against an event tag value.
#[derive(Debug, Clone)]
pub enum TagValue {
    /// `key` alone: any value.
    Any,
    /// `key:value`.
    Exact(String),
    /// `key:/pattern/`.
    Pattern(Regex),
}

/// A single `key[:value]` matcher tag.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    pub key: String,
    pub value: TagValue,
    raw: String,
}

impl TagMatcher {
    /// Parse `key`, `key:value` or `key:/regex/`.
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        let raw = raw.trim();
        let (key, value) = match raw.split_once(':') {
            None => (raw, TagValue::Any),
            Some((key, value)) => {
                let value = value.trim();
                if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
                    (key, TagValue::Pattern(Regex::new(&value[1..value.len() - 1])?))
                } else {
                    (key, TagValue::Exact(value.to_string()))
                }
            }
        };

        Ok(Self {
            key: key.trim().to_string(),
            value,
            raw: raw.to_string(),
        })
    }

    /// Whether the event tags satisfy this matcher tag.
    #[must_use]
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        let Some(actual) = tags.get(&self.key) else {
            return false;
        };
        match &self.value {
            TagValue::Any => true,
            TagValue::Exact(expected) => actual == expected,
            TagValue::Pattern(re) => re.is_match(actual),
        }
    }

    /// The tag as written in the directory.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl EntityMatcher {
    fn new(tags: Vec<TagMatcher>) -> Self {
        let precedence = if tags.iter().any(|t| t.key == "team") {
            3
        } else if tags.iter().any(|t| t.key == "service") {
            2
        } else {
            1
        };
        Self { tags, precedence }
    }

    /// Number of matcher tags satisfied by the event tags.
    #[must_use]
    pub fn match_count(&self, tags: &BTreeMap<String, String>) -> usize {
        self.tags.iter().filter(|t| t.matches(tags)).count()
    }

    /// Order-insensitive identity used to detect duplicate matchers.
    fn canonical(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.iter().map(|t| t.raw.clone()).collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Human-readable form, e.g. `[team:core, service:api]`.
    #[must_use]
    pub fn describe(&self) -> String {
        let tags: Vec<&str> = self.tags.iter().map(TagMatcher::as_str).collect();
        format!("[{}]", tags.join(", "))
    }
}

/// The loaded, validated team directory.
#[derive(Debug, Clone)]
pub struct TeamDirectory {
    teams: Vec<EngTeam>,
    default_index: usize,
    task_fields: TaskFieldIds,
}

impl TeamDirectory {
    /// Load and validate a directory document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let directory = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            teams = directory.teams.len(),
            default_team = %directory.fallback().name,
            "Loaded team directory"
        );
        Ok(directory)
    }

    /// Parse and validate a directory document.
    pub fn from_yaml_str(content: &str) -> Result<Self, DirectoryError> {
        let document: DirectoryDocument = serde_yaml::from_str(content)?;

        let defaults: Vec<usize> = document
            .teams
            .iter()
            .enumerate()
            .filter(|(_, t)| t.default)
            .map(|(i, _)| i)
            .collect();
        let default_index = match defaults.as_slice() {
            [] => return Err(DirectoryError::NoDefaultTeam),
            [only] => *only,
            many => {
                return Err(DirectoryError::MultipleDefaultTeams(
                    many.iter().map(|i| document.teams[*i].name.clone()).collect(),
                ))
            }
        };

        let mut claimed: HashMap<Vec<String>, String> = HashMap::new();
        let mut teams = Vec::with_capacity(document.teams.len());

        for record in document.teams {
            let mut entities = Vec::with_capacity(record.entities.len());
            for entity in record.entities {
                if entity.matchers.iter().all(|m| m.trim().is_empty()) {
                    return Err(DirectoryError::EmptyMatcher { team: record.name });
                }
                let tags = entity
                    .matchers
                    .iter()
                    .filter(|m| !m.trim().is_empty())
                    .map(|m| {
                        TagMatcher::parse(m).map_err(|source| DirectoryError::InvalidRegex {
                            team: record.name.clone(),
                            tag: m.clone(),
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let matcher = EntityMatcher::new(tags);

                let key = matcher.canonical();
                if let Some(first) = claimed.get(&key) {
                    return Err(DirectoryError::DuplicateMatcher {
                        matcher: key,
                        first: first.clone(),
                        second: record.name,
                    });
                }
                claimed.insert(key, record.name.clone());
                entities.push(matcher);
            }

            debug!(team = %record.name, matchers = entities.len(), "Registered team");
            teams.push(EngTeam {
                name: record.name,
                contact: record.contact,
                team_id: record.team_id,
                backlog_project: record.backlog_project,
                sprint_portfolio: record.sprint_portfolio,
                sandbox_portfolio: record.sandbox_portfolio,
                entities,
            });
        }

        Ok(Self {
            teams,
            default_index,
            task_fields: document.task_fields,
        })
    }

    /// Teams in declaration order.
    #[must_use]
    pub fn teams(&self) -> &[EngTeam] {
        &self.teams
    }

    /// The team that owns anything no matcher claims.
    #[must_use]
    pub fn fallback(&self) -> &EngTeam {
        &self.teams[self.default_index]
    }

    #[must_use]
    pub fn task_fields(&self) -> &TaskFieldIds {
        &self.task_fields
    }

    /// Look up a team by name.
    #[must_use]
    pub fn team(&self, name: &str) -> Option<&EngTeam> {
        self.teams.iter().find(|t| t.name == name)
    }

    /// Every portfolio referenced by any team.
    #[must_use]
    pub fn portfolios(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .teams
            .iter()
            .flat_map(|t| [t.sprint_portfolio.clone(), t.sandbox_portfolio.clone()])
            .flatten()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
