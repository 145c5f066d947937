//! provmon agent - metrics monitoring agent
//!
//! Periodically polls configured metrics endpoints, filters and reshapes the
//! samples, and ships them to the ingestion sink (and optionally a secondary
//! analytics sink):
//! - Configuration comes from a key-value secret store
//! - One concurrent unit of execution per provider instance
//! - Per-instance scheduling state persisted across restarts

mod check;
mod config;
mod errors;
mod exposition;
mod fetch;
mod filter;
mod provider;
mod runner;
mod serialize;
mod sink;
mod state;

use std::process;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AgentSettings, FileSecretStore, SecretStore};
use crate::errors::{
    EXIT_FILE_PERMISSION_DENIED, EXIT_GETTING_LOG_CREDENTIALS, EXIT_LOADING_CONFIG,
};
use crate::runner::{MonitorContext, Scheduler};
use crate::sink::{AnalyticsSink, HttpAnalyticsSink, HttpIngestionSink, IngestionSink};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("provmon_agent=info")),
        )
        .init();

    info!("provmon agent v{} starting", serialize::PAYLOAD_VERSION);

    let settings = AgentSettings::from_env();
    if let Err(e) = std::fs::create_dir_all(&settings.state_dir) {
        error!(
            "could not create state directory {}; please check permissions ({e})",
            settings.state_dir.display()
        );
        process::exit(EXIT_FILE_PERMISSION_DENIED);
    }
    let store = FileSecretStore::new(&settings.secrets_dir);

    let mut ticker = tokio::time::interval(settings.cycle_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_monitor_cycle(&settings, &store).await;
    }
}

/// Execute one full monitoring cycle: load config, build sinks, fan out the
/// scheduler over all provider instances. Fatal configuration problems exit
/// the process with a distinct code.
async fn run_monitor_cycle(settings: &AgentSettings, store: &dyn SecretStore) {
    info!("starting monitor cycle");

    let monitor_config = match config::load_config(store, &settings.state_dir).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("failed to load config from secret store ({e})");
            process::exit(EXIT_LOADING_CONFIG);
        }
    };

    let Some((endpoint, workspace_id, shared_key)) = monitor_config.global.ingestion() else {
        error!(
            "global config must contain ingestionEndpoint, logAnalyticsWorkspaceId \
             and logAnalyticsSharedKey"
        );
        process::exit(EXIT_GETTING_LOG_CREDENTIALS);
    };
    let ingestion: Arc<dyn IngestionSink> =
        match HttpIngestionSink::new(endpoint, workspace_id, shared_key) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!("could not build ingestion sink ({e})");
                process::exit(EXIT_GETTING_LOG_CREDENTIALS);
            }
        };

    let analytics: Option<Arc<dyn AnalyticsSink>> =
        match monitor_config.global.analytics_endpoint.as_deref() {
            Some(endpoint) => match HttpAnalyticsSink::new(endpoint) {
                Ok(sink) => Some(Arc::new(sink)),
                Err(e) => {
                    warn!("could not build analytics sink, continuing without it ({e})");
                    None
                }
            },
            None => None,
        };

    let ctx = Arc::new(MonitorContext {
        global: monitor_config.global.clone(),
        ingestion,
        analytics,
        state_dir: settings.state_dir.clone(),
    });
    Scheduler::new(ctx).run_cycle(monitor_config.units).await;

    info!("monitor cycle successfully completed");
}
