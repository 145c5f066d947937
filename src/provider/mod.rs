//! Provider abstraction and type registry
//!
//! A ProviderInstance owns the connection configuration for one monitored
//! target; its checks are driven by the runner. New provider types register
//! in `make_provider_unit`, the static type→constructor table resolved at
//! config load (unknown types are an explicit error, never a silent skip).

pub mod prometheus;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::check::Check;
use crate::config::ProviderConfig;
use crate::errors::CheckError;
use crate::fetch::RetryPolicy;

#[async_trait]
pub trait ProviderInstance: Send + Sync {
    /// Configured name of this instance.
    fn name(&self) -> &str;

    /// Provider type tag (registry key).
    fn type_tag(&self) -> &str;

    /// `<type>/<name>`, used as the log field on every line about this instance.
    fn full_name(&self) -> String {
        format!("{}/{}", self.type_tag(), self.name())
    }

    /// Stable identity of the monitored target (e.g. host component of the
    /// URL), attached as a label to every emitted record.
    fn instance(&self) -> &str;

    /// Free-form metadata attached to every emitted record.
    fn metadata(&self) -> &Map<String, Value>;

    /// Retry policy applied to scheduled fetches of this instance.
    fn retry_policy(&self) -> RetryPolicy;

    /// One single-shot fetch of the raw metrics payload; retry wrapping is
    /// the call site's business.
    async fn fetch_metrics(&self) -> Result<String, CheckError>;

    /// Live reachability check: fetch once and confirm the payload parses to
    /// at least one well-formed record. Never propagates an error.
    async fn validate(&self) -> bool;

    /// Checks instantiated when the config entry does not declare any.
    fn default_checks(&self) -> Vec<Check>;
}

/// One unit of concurrency for the scheduler: a provider instance together
/// with the checks it exclusively owns.
pub struct ProviderUnit {
    pub provider: Arc<dyn ProviderInstance>,
    pub checks: Vec<Check>,
}

impl std::fmt::Debug for ProviderUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderUnit")
            .field("provider", &self.provider.full_name())
            .field("checks", &self.checks)
            .finish()
    }
}

/// Construct a provider unit from a parsed config entry via the static type
/// registry.
pub fn make_provider_unit(config: &ProviderConfig) -> anyhow::Result<ProviderUnit> {
    let provider: Arc<dyn ProviderInstance> = match config.provider_type.as_str() {
        prometheus::PROVIDER_TYPE => {
            Arc::new(prometheus::PrometheusProviderInstance::new(config)?)
        }
        other => bail!("unknown provider type {other:?}"),
    };

    let checks = if config.checks.is_empty() {
        provider.default_checks()
    } else {
        config.checks.iter().map(Check::from_config).collect()
    };

    Ok(ProviderUnit { provider, checks })
}
