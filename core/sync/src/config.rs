//! Sync configuration.
//!
//! Connection parameters for the remote backend plus the knobs of the sync
//! core. The configuration is validated once, when a
//! [`SyncContext`](crate::SyncContext) is built; a missing parameter disables
//! remote sync but never local operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use blocksync_common::{validate_segment, Error, Result};

use crate::retry::RetryConfig;

/// Default remote partition.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Prefix of every environment variable read by [`SyncConfig::from_env`].
pub const ENV_PREFIX: &str = "BLOCKSYNC_";

/// Connection parameters of the remote document and blob stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub app_id: Option<String>,
    pub database_url: Option<String>,
    /// Only needed for attachments.
    pub storage_bucket: Option<String>,
}

impl RemoteConfig {
    /// Names of the required parameters that are absent or blank.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        [
            ("apiKey", &self.api_key),
            ("authDomain", &self.auth_domain),
            ("projectId", &self.project_id),
            ("appId", &self.app_id),
            ("databaseUrl", &self.database_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(key, _)| key)
        .collect()
    }

    /// Whether every required parameter is present.
    pub fn is_complete(&self) -> bool {
        self.missing_keys().is_empty()
    }
}

/// Whether the remote branch of sync operations may run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCapability {
    Enabled,
    Disabled { reason: String },
}

impl RemoteCapability {
    pub fn is_enabled(&self) -> bool {
        matches!(self, RemoteCapability::Enabled)
    }
}

/// Sync core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    /// Remote partition shared by every document of this deployment.
    pub namespace: String,
    /// Master switch for remote sync.
    pub sync_enabled: bool,
    /// Quiet period before a save is pushed remotely; `None` pushes inline.
    pub flush_delay_ms: Option<u64>,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            sync_enabled: true,
            flush_delay_ms: None,
            max_retries: 2,
            retry_initial_delay_ms: 250,
        }
    }
}

impl SyncConfig {
    /// Configuration with local operation only.
    pub fn local_only() -> Self {
        Self {
            sync_enabled: false,
            ..Self::default()
        }
    }

    /// Configuration with remote sync using `remote`.
    pub fn with_remote(remote: RemoteConfig) -> Self {
        Self {
            remote,
            ..Self::default()
        }
    }

    /// Check whether remote sync can be attempted.
    pub fn validate(&self) -> RemoteCapability {
        if !self.sync_enabled {
            return RemoteCapability::Disabled {
                reason: "Remote sync disabled".to_string(),
            };
        }

        let missing = self.remote.missing_keys();
        if !missing.is_empty() {
            return RemoteCapability::Disabled {
                reason: format!("Missing remote configuration: {}", missing.join(", ")),
            };
        }

        if let Err(e) = validate_segment(&self.namespace) {
            return RemoteCapability::Disabled {
                reason: format!("Invalid namespace {:?}: {}", self.namespace, e),
            };
        }

        RemoteCapability::Enabled
    }

    /// Debounce window for remote pushes.
    pub fn flush_delay(&self) -> Option<Duration> {
        self.flush_delay_ms.map(Duration::from_millis)
    }

    /// Retry policy for remote calls.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.retry_initial_delay_ms),
        )
    }

    /// Read the configuration from `BLOCKSYNC_*` variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// - A boolean or numeric variable that does not parse
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        let var = |name: &str| vars.get(&format!("{}{}", ENV_PREFIX, name)).cloned();

        let mut config = Self {
            remote: RemoteConfig {
                api_key: var("API_KEY"),
                auth_domain: var("AUTH_DOMAIN"),
                project_id: var("PROJECT_ID"),
                app_id: var("APP_ID"),
                database_url: var("DATABASE_URL"),
                storage_bucket: var("STORAGE_BUCKET"),
            },
            ..Self::default()
        };

        if let Some(namespace) = var("NAMESPACE").filter(|ns| !ns.trim().is_empty()) {
            config.namespace = namespace.trim().to_string();
        }
        if let Some(enabled) = var("SYNC_ENABLED") {
            config.sync_enabled = parse_flag("SYNC_ENABLED", &enabled)?;
        }
        if let Some(delay) = var("FLUSH_DELAY_MS") {
            config.flush_delay_ms = Some(parse_number("FLUSH_DELAY_MS", &delay)?);
        }

        Ok(config)
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "{}{} must be a boolean, got {:?}",
            ENV_PREFIX, name, value
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::Configuration(format!(
            "{}{} must be a non-negative integer, got {:?}",
            ENV_PREFIX, name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_remote() -> RemoteConfig {
        RemoteConfig {
            api_key: Some("key".to_string()),
            auth_domain: Some("example.test".to_string()),
            project_id: Some("blocks".to_string()),
            app_id: Some("1:web".to_string()),
            database_url: Some("https://blocks.example.test".to_string()),
            storage_bucket: None,
        }
    }

    #[test]
    fn test_default_is_disabled_for_missing_keys() {
        let capability = SyncConfig::default().validate();
        let RemoteCapability::Disabled { reason } = capability else {
            panic!("expected disabled capability");
        };
        assert!(reason.contains("apiKey"));
        assert!(reason.contains("databaseUrl"));
    }

    #[test]
    fn test_complete_config_is_enabled() {
        let config = SyncConfig::with_remote(complete_remote());
        assert_eq!(config.validate(), RemoteCapability::Enabled);
        assert!(config.remote.is_complete());
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut remote = complete_remote();
        remote.app_id = Some("   ".to_string());
        assert_eq!(remote.missing_keys(), vec!["appId"]);
    }

    #[test]
    fn test_flag_and_namespace_disable_remote() {
        let mut config = SyncConfig::with_remote(complete_remote());
        config.sync_enabled = false;
        assert!(!config.validate().is_enabled());

        let mut config = SyncConfig::with_remote(complete_remote());
        config.namespace = "team.a".to_string();
        assert!(!config.validate().is_enabled());
    }

    #[test]
    fn test_from_vars() {
        let config = SyncConfig::from_vars([
            ("BLOCKSYNC_API_KEY", "key"),
            ("BLOCKSYNC_AUTH_DOMAIN", "example.test"),
            ("BLOCKSYNC_PROJECT_ID", "blocks"),
            ("BLOCKSYNC_APP_ID", "1:web"),
            ("BLOCKSYNC_DATABASE_URL", "https://blocks.example.test"),
            ("BLOCKSYNC_NAMESPACE", " staging "),
            ("BLOCKSYNC_FLUSH_DELAY_MS", "1500"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.flush_delay(), Some(Duration::from_millis(1500)));
        assert!(config.sync_enabled);
        assert!(config.validate().is_enabled());
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        assert!(SyncConfig::from_vars([("BLOCKSYNC_SYNC_ENABLED", "maybe")]).is_err());
        assert!(SyncConfig::from_vars([("BLOCKSYNC_FLUSH_DELAY_MS", "-1")]).is_err());
        assert!(!SyncConfig::from_vars([("BLOCKSYNC_SYNC_ENABLED", "off")])
            .unwrap()
            .sync_enabled);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = SyncConfig::with_remote(complete_remote());
        config.flush_delay_ms = Some(250);

        let json = config.to_json().unwrap();
        assert!(json.contains("\"databaseUrl\""));

        let restored = SyncConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);

        let partial = SyncConfig::from_json(r#"{"namespace": "qa"}"#).unwrap();
        assert_eq!(partial.namespace, "qa");
        assert!(partial.sync_enabled);
    }
}
