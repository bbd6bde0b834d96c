//! Provider credentials.
//!
//! A secret is a named JSON object of string values. It is fetched once
//! during cold start; any failure aborts startup.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::SecretsError;

/// HMAC key for Sentry webhook signatures.
pub const SENTRY_CLIENT_SECRET: &str = "SENTRY_CLIENT_SECRET";
/// Shared token Datadog sends with every webhook.
pub const DATADOG_SECRET_TOKEN: &str = "DATADOG_SECRET_TOKEN";
pub const SENTRY_PAT: &str = "SENTRY_PAT";
pub const ASANA_PAT: &str = "ASANA_PAT";
pub const DATADOG_API_KEY: &str = "DATADOG_API_KEY";
pub const DATADOG_APP_KEY: &str = "DATADOG_APP_KEY";

/// Fetches a named secret as a key/value map.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretsError>;
}

/// Reads a secret from an environment variable holding a JSON object.
///
/// The variable name is the secret name upper-cased with `-` replaced by `_`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretsError> {
        let var = name.to_uppercase().replace('-', "_");
        let raw = env::var(&var).map_err(|_| SecretsError::NotFound(var.clone()))?;
        parse_secret(name, &raw)
    }
}

/// Reads a secret from `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    #[instrument(skip(self))]
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretsError> {
        let path = self.dir.join(format!("{name}.json"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretsError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Read secret file");
        parse_secret(name, &raw)
    }
}

fn parse_secret(name: &str, raw: &str) -> Result<HashMap<String, String>, SecretsError> {
    serde_json::from_str(raw).map_err(|source| SecretsError::Malformed {
        name: name.to_string(),
        source,
    })
}

fn required(
    secret: &HashMap<String, String>,
    name: &str,
    key: &str,
) -> Result<String, SecretsError> {
    secret
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| SecretsError::MissingKey {
            name: name.to_string(),
            key: key.to_string(),
        })
}

/// Keys the producer needs to authenticate webhooks.
#[derive(Clone)]
pub struct ProducerSecrets {
    pub sentry_client_secret: String,
    pub datadog_secret_token: String,
}

impl ProducerSecrets {
    pub fn from_map(name: &str, secret: &HashMap<String, String>) -> Result<Self, SecretsError> {
        Ok(Self {
            sentry_client_secret: required(secret, name, SENTRY_CLIENT_SECRET)?,
            datadog_secret_token: required(secret, name, DATADOG_SECRET_TOKEN)?,
        })
    }
}

impl std::fmt::Debug for ProducerSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSecrets").finish_non_exhaustive()
    }
}

/// API tokens the consumer's clients need.
#[derive(Clone)]
pub struct ConsumerSecrets {
    pub sentry_pat: String,
    pub asana_pat: String,
    pub datadog_api_key: String,
    pub datadog_app_key: String,
}

impl ConsumerSecrets {
    pub fn from_map(name: &str, secret: &HashMap<String, String>) -> Result<Self, SecretsError> {
        Ok(Self {
            sentry_pat: required(secret, name, SENTRY_PAT)?,
            asana_pat: required(secret, name, ASANA_PAT)?,
            datadog_api_key: required(secret, name, DATADOG_API_KEY)?,
            datadog_app_key: required(secret, name, DATADOG_APP_KEY)?,
        })
    }
}

impl std::fmt::Debug for ConsumerSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSecrets").finish_non_exhaustive()
    }
}
