//! Configuration loading
//!
//! All monitoring configuration lives in a secret store: a mapping from
//! secret name to JSON string. The reserved entry `global` holds global
//! parameters (ingestion credentials, analytics flag); every other entry
//! describes one provider instance. A malformed entry is logged and skipped;
//! an empty result (no globals or zero instances) is fatal to the cycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, error, warn};

use crate::check::CheckConfig;
use crate::provider::{ProviderUnit, make_provider_unit};
use crate::state;

/// Reserved secret name holding the global parameters.
pub const GLOBAL_SECTION: &str = "global";

/// Key-value secret store holding the agent's configuration.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Current mapping from secret name to JSON string.
    async fn current_secrets(&self) -> anyhow::Result<BTreeMap<String, String>>;
}

/// File-backed secret store: every `<name>.json` file in the directory is one
/// secret entry.
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
    async fn current_secrets(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut secrets = BTreeMap::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("could not read secrets directory {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let value = fs::read_to_string(&path)
                .await
                .with_context(|| format!("could not read secret file {}", path.display()))?;
            secrets.insert(name.to_string(), value);
        }
        Ok(secrets)
    }
}

/// Global parameters from the reserved secret entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalParams {
    pub log_analytics_workspace_id: Option<String>,
    pub log_analytics_shared_key: Option<String>,
    /// Collector endpoint the ingestion sink POSTs record batches to.
    pub ingestion_endpoint: Option<String>,
    /// Endpoint for the secondary analytics sink.
    pub analytics_endpoint: Option<String>,
    #[serde(default = "default_analytics_enabled")]
    pub enable_customer_analytics: bool,
}

fn default_analytics_enabled() -> bool {
    true
}

impl GlobalParams {
    /// Ingestion credentials, present only when all required fields are set.
    pub fn ingestion(&self) -> Option<(&str, &str, &str)> {
        match (
            &self.ingestion_endpoint,
            &self.log_analytics_workspace_id,
            &self.log_analytics_shared_key,
        ) {
            (Some(endpoint), Some(workspace), Some(key)) => {
                Some((endpoint, workspace, key))
            }
            _ => None,
        }
    }
}

/// One provider instance entry as stored in the secret store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

/// Fully loaded monitoring configuration for one cycle.
pub struct MonitorConfig {
    pub global: GlobalParams,
    pub units: Vec<ProviderUnit>,
}

/// Load the entire config from the secret store and restore persisted check
/// state. Individual malformed entries are skipped; missing global params or
/// zero usable provider instances fail the load.
pub async fn load_config(
    store: &dyn SecretStore,
    state_dir: &Path,
) -> anyhow::Result<MonitorConfig> {
    let secrets = store.current_secrets().await?;

    let mut global: Option<GlobalParams> = None;
    let mut units: Vec<ProviderUnit> = Vec::new();
    for (secret_name, secret_value) in &secrets {
        debug!(secret = %secret_name, "parsing secret store entry");
        if secret_name == GLOBAL_SECTION {
            match serde_json::from_str(secret_value) {
                Ok(params) => global = Some(params),
                Err(e) => error!("invalid JSON format for global config ({e})"),
            }
            continue;
        }

        let config: ProviderConfig = match serde_json::from_str(secret_value) {
            Ok(config) => config,
            Err(e) => {
                error!(secret = %secret_name, "invalid JSON format for secret ({e})");
                continue;
            }
        };
        let mut unit = match make_provider_unit(&config) {
            Ok(unit) => unit,
            Err(e) => {
                error!(instance = %config.name, "could not instantiate provider instance ({e})");
                continue;
            }
        };

        match state::read_instance_state(state_dir, unit.provider.name()).await {
            Some(persisted) => state::apply_instance_state(&mut unit, &persisted),
            None => {
                // First sight of this instance: run the reachability check once
                if !unit.provider.validate().await {
                    warn!(
                        instance = %unit.provider.full_name(),
                        "validation failed, keeping instance and retrying on schedule"
                    );
                }
            }
        }
        units.push(unit);
    }

    let Some(global) = global else {
        bail!("did not find global parameters in the secret store");
    };
    if units.is_empty() {
        bail!("did not find any usable provider instances in the secret store");
    }
    Ok(MonitorConfig { global, units })
}

/// Process-level settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub secrets_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cycle_interval: Duration,
}

impl AgentSettings {
    pub fn from_env() -> Self {
        let secrets_dir =
            std::env::var("PROVMON_SECRETS_DIR").unwrap_or_else(|_| "secrets".to_string());
        let state_dir = std::env::var("PROVMON_STATE_DIR").unwrap_or_else(|_| "state".to_string());
        let cycle_interval = std::env::var("PROVMON_CYCLE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        Self {
            secrets_dir: PathBuf::from(secrets_dir),
            state_dir: PathBuf::from(state_dir),
            cycle_interval: Duration::from_secs(cycle_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_secret(dir: &Path, name: &str, value: &str) {
        fs::write(dir.join(format!("{name}.json")), value)
            .await
            .unwrap();
    }

    fn provider_json(name: &str) -> String {
        // Endpoint with a state file on disk so load skips live validation
        format!(
            r#"{{"name":"{name}","type":"prometheus","properties":{{"prometheusUrl":"http://localhost:9100/metrics"}}}}"#
        )
    }

    async fn seed_state(state_dir: &Path, name: &str) {
        fs::write(
            state::state_path(state_dir, name),
            r#"{"global":{},"checks":{}}"#,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_config_skips_malformed_entries() {
        let secrets = tempfile::tempdir().unwrap();
        let states = tempfile::tempdir().unwrap();
        write_secret(secrets.path(), GLOBAL_SECTION, r#"{"enableCustomerAnalytics":false}"#).await;
        write_secret(secrets.path(), "good", &provider_json("good")).await;
        write_secret(secrets.path(), "broken", "{not json").await;
        write_secret(
            secrets.path(),
            "unknown",
            r#"{"name":"unknown","type":"mystery"}"#,
        )
        .await;
        seed_state(states.path(), "good").await;

        let store = FileSecretStore::new(secrets.path());
        let config = load_config(&store, states.path()).await.unwrap();
        assert_eq!(config.units.len(), 1);
        assert_eq!(config.units[0].provider.name(), "good");
        assert!(!config.global.enable_customer_analytics);
    }

    #[tokio::test]
    async fn test_load_config_without_global_is_fatal() {
        let secrets = tempfile::tempdir().unwrap();
        let states = tempfile::tempdir().unwrap();
        write_secret(secrets.path(), "good", &provider_json("good")).await;
        seed_state(states.path(), "good").await;

        let store = FileSecretStore::new(secrets.path());
        assert!(load_config(&store, states.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_config_without_instances_is_fatal() {
        let secrets = tempfile::tempdir().unwrap();
        let states = tempfile::tempdir().unwrap();
        write_secret(secrets.path(), GLOBAL_SECTION, "{}").await;

        let store = FileSecretStore::new(secrets.path());
        assert!(load_config(&store, states.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_persisted_state_restored_on_load() {
        let secrets = tempfile::tempdir().unwrap();
        let states = tempfile::tempdir().unwrap();
        write_secret(secrets.path(), GLOBAL_SECTION, "{}").await;
        write_secret(secrets.path(), "node1", &provider_json("node1")).await;
        fs::write(
            state::state_path(states.path(), "node1"),
            r#"{"global":{},"checks":{"metrics":{"isEnabled":false,"lastRun":"2026-08-30T00:00:00Z"}}}"#,
        )
        .await
        .unwrap();

        let store = FileSecretStore::new(secrets.path());
        let config = load_config(&store, states.path()).await.unwrap();
        assert!(!config.units[0].checks[0].is_enabled());
        assert!(config.units[0].checks[0].last_run().is_some());
    }

    #[test]
    fn test_ingestion_credentials_require_all_fields() {
        let mut params = GlobalParams::default();
        assert!(params.ingestion().is_none());
        params.ingestion_endpoint = Some("http://collector.local/ingest".into());
        params.log_analytics_workspace_id = Some("ws".into());
        assert!(params.ingestion().is_none());
        params.log_analytics_shared_key = Some("key".into());
        assert!(params.ingestion().is_some());
    }
}
