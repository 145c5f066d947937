//! Per-instance persisted state
//!
//! Each provider instance owns one state file `<state_dir>/<name>.state`
//! holding a small JSON blob: a free-form global section plus one record per
//! check (enabled flag, last-run time). Writes go through a temp file and an
//! atomic rename so a crash never leaves a corrupt partial state behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::provider::ProviderUnit;

/// Persisted scheduling state of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStateRecord {
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// On-disk layout of one instance's state file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InstanceState {
    /// Extensible provider-level state; currently unused but round-tripped.
    #[serde(default)]
    pub global: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub checks: HashMap<String, CheckStateRecord>,
}

pub fn state_path(state_dir: &Path, instance_name: &str) -> PathBuf {
    state_dir.join(format!("{instance_name}.state"))
}

/// Read an instance's state file. A missing file is normal (first run);
/// unreadable or malformed content is logged and treated as absent.
pub async fn read_instance_state(state_dir: &Path, instance_name: &str) -> Option<InstanceState> {
    let path = state_path(state_dir, instance_name);
    let data = match fs::read_to_string(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(instance = instance_name, "state file {} does not exist", path.display());
            return None;
        }
        Err(e) => {
            warn!(instance = instance_name, "could not read state file {} ({e})", path.display());
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(instance = instance_name, "could not parse state file {} ({e})", path.display());
            None
        }
    }
}

/// Write the current state of a provider unit's checks to its state file,
/// atomically (write temp file, then rename over the target).
pub async fn write_unit_state(state_dir: &Path, unit: &ProviderUnit) -> anyhow::Result<()> {
    let mut state = InstanceState::default();
    for check in &unit.checks {
        state
            .checks
            .insert(check.name.clone(), check.state_record());
    }

    let path = state_path(state_dir, unit.provider.name());
    let tmp_path = path.with_extension("state.tmp");
    let json = serde_json::to_string_pretty(&state)?;
    fs::write(&tmp_path, json)
        .await
        .with_context(|| format!("could not write state file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .await
        .with_context(|| format!("could not move state file into place at {}", path.display()))?;
    debug!(instance = unit.provider.name(), "state file written");
    Ok(())
}

/// Restore persisted check state into a freshly constructed unit.
pub fn apply_instance_state(unit: &mut ProviderUnit, state: &InstanceState) {
    for check in unit.checks.iter_mut() {
        if let Some(record) = state.checks.get(&check.name) {
            check.apply_state(record);
        }
    }
}
