//! Configuration for the alert bridge service.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_RUNBOOK_URL: &str =
    "https://www.notion.so/runbooks/Alert-Triage-Runbook-1a2b3c4d5e6f";

/// Alert bridge configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Deployment name (`development`, `staging`, `production`).
    pub deployment: String,
    /// Skip signature checks and file every task to sandbox projects.
    pub development: bool,
    /// Name of the secret holding provider credentials.
    pub secret_name: String,
    /// Directory holding `<secret_name>.json`; env var lookup when unset.
    pub secrets_dir: Option<String>,
    /// Path to the team directory document.
    pub teams_file: String,
    /// Emit JSON log lines.
    pub log_json: bool,
    /// Project routing.
    pub projects: ProjectConfig,
    /// How often current sprint and release projects are re-resolved.
    /// Zero disables the refresh.
    pub project_refresh: Duration,
    /// Task note content.
    pub notes: NoteConfig,
    /// Upstream API endpoints.
    pub endpoints: EndpointConfig,
    /// In-process queue tuning.
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env::var("BRIDGE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            deployment: env::var("BRIDGE_DEPLOYMENT")
                .map(|s| s.to_lowercase())
                .unwrap_or_else(|_| "development".to_string()),
            development: env_flag("BRIDGE_DEVELOPMENT"),
            secret_name: env::var("BRIDGE_SECRET_NAME")
                .unwrap_or_else(|_| "alert-bridge".to_string()),
            secrets_dir: env::var("BRIDGE_SECRETS_DIR")
                .ok()
                .filter(|s| !s.is_empty()),
            teams_file: env::var("BRIDGE_TEAMS_FILE")
                .unwrap_or_else(|_| "data/teams.yaml".to_string()),
            log_json: env_flag("BRIDGE_LOG_JSON"),
            projects: ProjectConfig::default(),
            project_refresh: Duration::from_secs(
                env::var("BRIDGE_PROJECT_REFRESH_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            notes: NoteConfig::default(),
            endpoints: EndpointConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Read configuration from the environment and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that must never reach production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.development && self.deployment == "production" {
            return Err(ConfigError::DevelopmentInProduction(
                self.deployment.clone(),
            ));
        }
        Ok(())
    }
}

/// Global project and portfolio ids used when resolving task targets.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Project every development task is also filed to.
    pub dev_project: Option<String>,
    /// Portfolio whose newest project is the current release-testing project.
    pub release_portfolio: Option<String>,
    /// Fixed project used when nothing else resolves. Falls back to the
    /// default team's backlog when unset.
    pub default_project: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dev_project: non_empty("BRIDGE_DEV_PROJECT_ID"),
            release_portfolio: non_empty("BRIDGE_RELEASE_PORTFOLIO_ID"),
            default_project: non_empty("BRIDGE_DEFAULT_PROJECT_ID"),
        }
    }
}

/// Values rendered into task notes.
#[derive(Debug, Clone)]
pub struct NoteConfig {
    pub runbook_url: String,
    /// Role name prefix for the AWS switch-role link; the region is appended.
    pub support_role: String,
    /// Accounts we cannot assume a role into.
    pub self_hosted_accounts: Vec<String>,
}

impl Default for NoteConfig {
    fn default() -> Self {
        Self {
            runbook_url: env::var("BRIDGE_RUNBOOK_URL")
                .unwrap_or_else(|_| DEFAULT_RUNBOOK_URL.to_string()),
            support_role: env::var("BRIDGE_SUPPORT_ROLE")
                .unwrap_or_else(|_| "SupportRole".to_string()),
            self_hosted_accounts: env::var("BRIDGE_SELF_HOSTED_ACCOUNTS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Base URLs of the upstream services.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub sentry_api: String,
    /// Sentry organization slug, used to build issue URLs.
    pub sentry_org: Option<String>,
    pub datadog_api: String,
    /// Datadog UI base, used for trace, log and event deep links.
    pub datadog_app: String,
    pub asana_api: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sentry_api: env::var("SENTRY_API_URL")
                .unwrap_or_else(|_| "https://sentry.io".to_string()),
            sentry_org: non_empty("SENTRY_ORG"),
            datadog_api: env::var("DATADOG_API_URL")
                .unwrap_or_else(|_| "https://api.datadoghq.com".to_string()),
            datadog_app: env::var("DATADOG_APP_URL")
                .unwrap_or_else(|_| "https://app.datadoghq.com".to_string()),
            asana_api: env::var("ASANA_API_URL")
                .unwrap_or_else(|_| "https://app.asana.com/api/1.0".to_string()),
        }
    }
}

/// In-process queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Channel capacity; producers get `QueueError::Full` beyond it.
    pub capacity: usize,
    /// Maximum records handed to the consumer at once.
    pub batch_size: usize,
    /// How long the worker waits to fill a batch.
    pub batch_window: Duration,
    /// Deliveries before a message is dead-lettered.
    pub max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: env::var("BRIDGE_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024),
            batch_size: env::var("BRIDGE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
            batch_window: Duration::from_millis(
                env::var("BRIDGE_BATCH_WINDOW_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            max_receive_count: env::var("BRIDGE_MAX_RECEIVE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = ENV_MUTEX.lock().unwrap();

        env::remove_var("BRIDGE_PORT");
        env::remove_var("BRIDGE_DEVELOPMENT");
        env::remove_var("BRIDGE_DEPLOYMENT");
        env::remove_var("BRIDGE_SECRETS_DIR");
        env::remove_var("BRIDGE_BATCH_SIZE");
        env::remove_var("BRIDGE_PROJECT_REFRESH_SECS");

        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(!config.development);
        assert_eq!(config.deployment, "development");
        assert_eq!(config.secret_name, "alert-bridge");
        assert!(config.secrets_dir.is_none());
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.batch_window, Duration::from_millis(500));
        assert_eq!(config.notes.support_role, "SupportRole");
        assert_eq!(config.project_refresh, Duration::from_secs(3600));
    }

    #[test]
    fn test_config_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();

        env::set_var("BRIDGE_PORT", "9000");
        env::set_var("BRIDGE_DEVELOPMENT", "1");
        env::set_var("BRIDGE_SELF_HOSTED_ACCOUNTS", "111111111111, 222222222222,");
        env::set_var("BRIDGE_BATCH_SIZE", "0");

        let config = Config::default();
        assert_eq!(config.port, 9000);
        assert!(config.development);
        assert_eq!(
            config.notes.self_hosted_accounts,
            vec!["111111111111".to_string(), "222222222222".to_string()]
        );
        // Zero batch size is ignored
        assert_eq!(config.queue.batch_size, 10);

        env::remove_var("BRIDGE_PORT");
        env::remove_var("BRIDGE_DEVELOPMENT");
        env::remove_var("BRIDGE_SELF_HOSTED_ACCOUNTS");
        env::remove_var("BRIDGE_BATCH_SIZE");
    }

    #[test]
    fn test_development_rejected_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();

        env::set_var("BRIDGE_DEVELOPMENT", "true");
        env::set_var("BRIDGE_DEPLOYMENT", "Production");

        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::DevelopmentInProduction(_))
        ));

        env::set_var("BRIDGE_DEPLOYMENT", "staging");
        assert!(Config::from_env().is_ok());

        env::remove_var("BRIDGE_DEVELOPMENT");
        env::remove_var("BRIDGE_DEPLOYMENT");
    }
}
