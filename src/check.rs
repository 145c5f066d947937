//! Check scheduling state machine
//!
//! A Check owns the scheduling state (enabled flag, interval, last-run time)
//! and the action producing a result batch via fetch → filter → serialize.
//! `last_run` only advances on success, so a failed cycle retries on the next
//! pass instead of silently skipping an interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, warn};

use crate::errors::CheckError;
use crate::fetch;
use crate::filter::{self, FilterPatterns};
use crate::provider::ProviderInstance;
use crate::serialize::{self, RecordContext};
use crate::state::CheckStateRecord;

/// Lifecycle of a check within one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Disabled,
    /// Enabled but the interval has not elapsed yet.
    Pending,
    /// Enabled and the interval has elapsed.
    Due,
    Running,
    Completed,
    Failed,
}

/// Check definition as it appears in a provider's config entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub custom_log: String,
    #[serde(default = "default_time_generated_field")]
    pub time_generated_field: String,
    pub frequency_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub include_in_customer_analytics: bool,
    #[serde(default)]
    pub action: ActionConfig,
}

/// Fetch/filter parameters selected by a check's action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub include_prefixes: Option<String>,
    pub suppress_if_zero_prefixes: Option<String>,
}

fn default_time_generated_field() -> String {
    "TimeGeneratedPrometheus".to_string()
}

fn default_enabled() -> bool {
    true
}

/// One scheduled unit of work against a provider instance.
#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub description: String,
    /// Log category handed to the ingestion sink.
    pub custom_log: String,
    pub time_generated_field: String,
    pub frequency: Duration,
    pub include_in_customer_analytics: bool,
    action: ActionConfig,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    state: CheckState,
}

impl Check {
    pub fn from_config(config: &CheckConfig) -> Self {
        let state = if config.enabled {
            CheckState::Pending
        } else {
            CheckState::Disabled
        };
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            custom_log: config.custom_log.clone(),
            time_generated_field: config.time_generated_field.clone(),
            frequency: Duration::from_secs(config.frequency_secs),
            include_in_customer_analytics: config.include_in_customer_analytics,
            action: config.action.clone(),
            enabled: config.enabled,
            last_run: None,
            state,
        }
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A check is due iff it never ran or its interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last_run) => now - last_run >= chrono::Duration::from_std(self.frequency)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Re-derive the resting state from the enabled flag and the clock.
    pub fn refresh_state(&mut self, now: DateTime<Utc>) {
        self.state = if !self.enabled {
            CheckState::Disabled
        } else if self.is_due(now) {
            CheckState::Due
        } else {
            CheckState::Pending
        };
    }

    /// Terminal-per-cycle states return to their resting state.
    pub fn finish_cycle(&mut self) {
        if matches!(self.state, CheckState::Completed | CheckState::Failed) {
            self.refresh_state(Utc::now());
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Restore persisted state (enabled flag, last-run time) from disk.
    pub fn apply_state(&mut self, record: &CheckStateRecord) {
        self.enabled = record.is_enabled;
        self.last_run = record.last_run;
        self.refresh_state(Utc::now());
    }

    pub fn state_record(&self) -> CheckStateRecord {
        CheckStateRecord {
            is_enabled: self.enabled,
            last_run: self.last_run,
        }
    }

    /// Execute the check's action once: fetch (retried per the provider's
    /// policy), filter, serialize. On success `last_run` advances and the
    /// serialized record batch is returned; on failure the cycle's result is
    /// discarded and `last_run` stays put.
    pub async fn run(&mut self, provider: &dyn ProviderInstance) -> Result<String, CheckError> {
        self.state = CheckState::Running;
        match self.execute(provider).await {
            Ok(batch) => {
                let now = Utc::now();
                // last_run is monotonically non-decreasing
                self.last_run = Some(self.last_run.map_or(now, |previous| previous.max(now)));
                self.state = CheckState::Completed;
                Ok(batch)
            }
            Err(e) => {
                error!(check = %self.name, error = %e, "check cycle failed, result discarded");
                self.state = CheckState::Failed;
                Err(e)
            }
        }
    }

    async fn execute(&self, provider: &dyn ProviderInstance) -> Result<String, CheckError> {
        // Pattern compilation happens before any fetch; a malformed pattern
        // must never be masked by a fetch error.
        let patterns = FilterPatterns::compile(
            self.action.include_prefixes.as_deref(),
            self.action.suppress_if_zero_prefixes.as_deref(),
        )?;

        let raw = fetch::retry_call(&provider.retry_policy(), || provider.fetch_metrics()).await?;

        let families = match filter::filter_metrics(&raw, &patterns) {
            Ok(families) => Some(families),
            Err(CheckError::Parse(reason)) => {
                // Partial observability beats total silence: emit liveness=0
                warn!(
                    check = %self.name,
                    %reason,
                    "could not parse metrics payload, degrading to liveness record"
                );
                None
            }
            Err(other) => return Err(other),
        };

        let ctx = RecordContext {
            instance: provider.instance(),
            provider_name: provider.name(),
            metadata: provider.metadata(),
            time_generated_field: &self.time_generated_field,
        };
        serialize::serialize_result(families.as_deref(), &ctx)
    }
}
