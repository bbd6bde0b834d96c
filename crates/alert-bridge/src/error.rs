//! Error types shared across the bridge.

use reqwest::StatusCode;
use thiserror::Error;

use crate::consumer::Stage;

/// Failures loading or validating the team directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read team directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse team directory: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("team directory has no default team")]
    NoDefaultTeam,

    #[error("team directory has more than one default team: {0:?}")]
    MultipleDefaultTeams(Vec<String>),

    #[error("matcher {matcher:?} is declared by both {first} and {second}")]
    DuplicateMatcher {
        matcher: Vec<String>,
        first: String,
        second: String,
    },

    #[error("team {team} declares an empty matcher")]
    EmptyMatcher { team: String },

    #[error("team {team} has invalid regex in tag {tag}: {source}")]
    InvalidRegex {
        team: String,
        tag: String,
        #[source]
        source: regex::Error,
    },
}

/// Failures fetching provider credentials.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret {name} is not a JSON string map: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("secret {name} is missing key {key}")]
    MissingKey { name: String, key: String },

    #[error("failed to read secret file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to Sentry, Datadog or Asana.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error: {status} - {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{service} rejected the request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    /// Whether the lookup target is missing or hidden from this token.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::NOT_FOUND || *status == StatusCode::FORBIDDEN
        )
    }

    /// Whether Asana refused a custom-field enum value.
    #[must_use]
    pub fn is_enum_rejection(&self) -> bool {
        match self {
            Self::Rejected { message, .. } => mentions_enum(message),
            Self::Status { status, body, .. } => {
                *status == StatusCode::BAD_REQUEST && mentions_enum(body)
            }
            _ => false,
        }
    }
}

fn mentions_enum(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("enum_value") || lower.contains("enum option") || lower.contains("enum value")
}

/// Failures of the in-process queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue is full")]
    Full,
}

/// Reasons the webhook producer rejects a request.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("no signature header present")]
    MissingSignature,

    #[error("both signature headers present")]
    AmbiguousSignature,

    #[error("invalid {0} signature")]
    InvalidSignature(crate::events::Source),

    #[error("webhook body is not valid UTF-8: {0}")]
    InvalidBody(#[from] std::str::Utf8Error),

    #[error("failed to enqueue event: {0}")]
    Enqueue(#[from] QueueError),
}

impl ProducerError {
    /// HTTP status reported to the webhook caller.
    #[must_use]
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode as S;
        match self {
            Self::MissingSignature | Self::AmbiguousSignature | Self::InvalidBody(_) => {
                S::BAD_REQUEST
            }
            Self::InvalidSignature(_) => S::UNAUTHORIZED,
            Self::Enqueue(_) => S::SERVICE_UNAVAILABLE,
        }
    }
}

/// Cause of a consumer failure.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("message has no AlertType attribute")]
    MissingSource,

    #[error("unknown AlertType {0:?}")]
    UnknownSource(String),

    #[error("message body is not JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("event has no link key")]
    MissingLinkKey,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A per-message consumer failure, tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct ProcessError {
    pub stage: Stage,
    #[source]
    pub cause: FailureCause,
}

impl ProcessError {
    pub fn new(stage: Stage, cause: impl Into<FailureCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("development mode must be disabled in the {0} deployment")]
    DevelopmentInProduction(String),
}
