//! Prometheus provider
//!
//! Polls a Prometheus-format exposition endpoint. Connection properties:
//! `prometheusUrl` (required). The instance identity is the host component
//! of that URL.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, info};
use url::Url;

use crate::check::{ActionConfig, Check, CheckConfig};
use crate::config::ProviderConfig;
use crate::errors::CheckError;
use crate::exposition;
use crate::fetch::{CONNECT_TIMEOUT, MetricsFetcher, READ_TIMEOUT, RetryPolicy};
use crate::provider::ProviderInstance;

pub const PROVIDER_TYPE: &str = "prometheus";

const PROPERTY_URL: &str = "prometheusUrl";
const DEFAULT_FREQUENCY_SECS: u64 = 60;

pub struct PrometheusProviderInstance {
    name: String,
    metadata: Map<String, Value>,
    metrics_url: String,
    instance_name: String,
    fetcher: MetricsFetcher,
    retry: RetryPolicy,
}

impl PrometheusProviderInstance {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let mut instance = Self {
            name: config.name.clone(),
            metadata: config.metadata.clone(),
            metrics_url: String::new(),
            instance_name: String::new(),
            fetcher: MetricsFetcher::new(CONNECT_TIMEOUT, READ_TIMEOUT)?,
            retry: RetryPolicy::default(),
        };
        if !instance.parse_properties(&config.properties) {
            anyhow::bail!(
                "failed to parse properties of provider instance {}",
                config.name
            );
        }
        Ok(instance)
    }

    /// Validate the connection properties; fails closed on missing fields.
    fn parse_properties(&mut self, properties: &Map<String, Value>) -> bool {
        let url = properties
            .get(PROPERTY_URL)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if url.is_empty() {
            error!(provider = %self.full_name(), "{PROPERTY_URL} cannot be empty");
            return false;
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(provider = %self.full_name(), "{PROPERTY_URL} is not a valid URL ({e})");
                return false;
            }
        };
        let host = match parsed.host_str() {
            Some(host) => host.to_string(),
            None => {
                error!(provider = %self.full_name(), "{PROPERTY_URL} has no host component");
                return false;
            }
        };
        self.instance_name = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        self.metrics_url = url.to_string();
        true
    }
}

#[async_trait]
impl ProviderInstance for PrometheusProviderInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_tag(&self) -> &str {
        PROVIDER_TYPE
    }

    fn instance(&self) -> &str {
        &self.instance_name
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_metrics(&self) -> Result<String, CheckError> {
        self.fetcher.fetch(&self.metrics_url).await
    }

    async fn validate(&self) -> bool {
        info!(
            provider = %self.full_name(),
            "fetching data from {} to validate connection", self.metrics_url
        );
        let payload = match self.fetch_metrics().await {
            Ok(payload) => payload,
            Err(e) => {
                info!(provider = %self.full_name(), "failed to validate {} ({e})", self.metrics_url);
                return false;
            }
        };
        match exposition::parse_families(&payload) {
            Ok(families) if !families.is_empty() => true,
            Ok(_) => {
                info!(
                    provider = %self.full_name(),
                    "failed to validate {} (no metric families in payload)", self.metrics_url
                );
                false
            }
            Err(e) => {
                info!(provider = %self.full_name(), "failed to validate {} ({e})", self.metrics_url);
                false
            }
        }
    }

    fn default_checks(&self) -> Vec<Check> {
        vec![Check::from_config(&CheckConfig {
            name: "metrics".to_string(),
            description: "collect all metrics exposed by the endpoint".to_string(),
            custom_log: "PrometheusMetrics".to_string(),
            time_generated_field: "TimeGeneratedPrometheus".to_string(),
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            enabled: true,
            include_in_customer_analytics: false,
            action: ActionConfig::default(),
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> ProviderConfig {
        serde_json::from_value(serde_json::json!({
            "name": "node1",
            "type": "prometheus",
            "properties": { "prometheusUrl": url }
        }))
        .unwrap()
    }

    #[test]
    fn test_instance_identity_is_url_host() {
        let provider = PrometheusProviderInstance::new(&config(
            "http://target.example.com:9100/metrics",
        ))
        .unwrap();
        assert_eq!(provider.instance(), "target.example.com:9100");

        let provider =
            PrometheusProviderInstance::new(&config("https://target.example.com/metrics")).unwrap();
        assert_eq!(provider.instance(), "target.example.com");
    }

    #[test]
    fn test_missing_url_fails_closed() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "name": "node1",
            "type": "prometheus",
            "properties": {}
        }))
        .unwrap();
        assert!(PrometheusProviderInstance::new(&config).is_err());
    }

    #[test]
    fn test_malformed_url_fails_closed() {
        assert!(PrometheusProviderInstance::new(&config("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_validate_folds_fetch_errors_into_false() {
        // Nothing listens here; validate must return false, not propagate
        let provider =
            PrometheusProviderInstance::new(&config("http://127.0.0.1:1/metrics")).unwrap();
        assert!(!provider.validate().await);
    }
}
