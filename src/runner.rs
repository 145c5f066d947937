//! Check runner and scheduler
//!
//! The scheduler fans out one task per provider instance and joins them all
//! before the cycle completes; a panic inside one unit never aborts its
//! siblings. Within a unit, checks run strictly sequentially in declaration
//! order (checks may share rate-limited target state).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info};

use crate::config::GlobalParams;
use crate::provider::ProviderUnit;
use crate::sink::{AnalyticsSink, IngestionSink};
use crate::state;

/// Read-only per-cycle context shared by all units of concurrency.
pub struct MonitorContext {
    pub global: GlobalParams,
    pub ingestion: Arc<dyn IngestionSink>,
    pub analytics: Option<Arc<dyn AnalyticsSink>>,
    pub state_dir: PathBuf,
}

/// Fans out one `run_unit_cycle` task per provider instance.
pub struct Scheduler {
    ctx: Arc<MonitorContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }

    /// Run one full cycle over all provider instances. Completes only once
    /// every unit has returned; panicked units are logged and isolated.
    pub async fn run_cycle(&self, units: Vec<ProviderUnit>) {
        let mut names = Vec::new();
        let mut handles = Vec::new();
        for mut unit in units {
            let ctx = Arc::clone(&self.ctx);
            names.push(unit.provider.full_name());
            handles.push(tokio::spawn(async move {
                run_unit_cycle(&mut unit, &ctx).await;
            }));
        }

        for (full_name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(
                        instance = %full_name,
                        "provider unit panicked during cycle, sibling units unaffected"
                    );
                } else {
                    error!(instance = %full_name, "provider unit task aborted ({e})");
                }
            }
        }
    }
}

/// Drive all checks of one provider instance, sequentially.
///
/// Per check: skip unless enabled and due; run; hand the batch to the
/// ingestion sink; persist state; then emit to the analytics sink when both
/// the global and the per-check flag allow it. State is persisted after the
/// ingestion hand-off, so a crash between the two re-ingests on restart
/// (at-least-once).
pub async fn run_unit_cycle(unit: &mut ProviderUnit, ctx: &MonitorContext) {
    let provider_full = unit.provider.full_name();
    for idx in 0..unit.checks.len() {
        let check_full = format!("{provider_full}.{}", unit.checks[idx].name);
        let now = Utc::now();
        unit.checks[idx].refresh_state(now);
        if !unit.checks[idx].is_enabled() {
            info!(check = %check_full, "check is currently not enabled, skipping");
            continue;
        }
        if !unit.checks[idx].is_due(now) {
            info!(check = %check_full, "check is not due yet, skipping");
            continue;
        }

        info!(check = %check_full, "starting check");
        let custom_log = unit.checks[idx].custom_log.clone();
        let time_field = unit.checks[idx].time_generated_field.clone();
        let in_analytics = unit.checks[idx].include_in_customer_analytics;

        let batch = unit.checks[idx].run(unit.provider.as_ref()).await.ok();

        if let Some(batch) = &batch {
            if let Err(e) = ctx.ingestion.ingest(&custom_log, batch, &time_field).await {
                error!(check = %check_full, "could not ingest record batch ({e})");
            }
        }

        // State is persisted even after a failed run so enable-flag changes
        // survive; last_run only moved if the run succeeded.
        if let Err(e) = state::write_unit_state(&ctx.state_dir, unit).await {
            error!(check = %check_full, "could not persist instance state ({e})");
        }

        if let Some(batch) = &batch {
            if ctx.global.enable_customer_analytics && in_analytics {
                if let Some(analytics) = &ctx.analytics {
                    send_customer_analytics(analytics.as_ref(), &custom_log, batch).await;
                }
            }
        }

        unit.checks[idx].finish_cycle();
        info!(check = %check_full, "finished check");
    }
}

/// Re-emit every record of the batch as one wrapped analytics message.
async fn send_customer_analytics(sink: &dyn AnalyticsSink, log_category: &str, batch: &str) {
    let records: Vec<Value> = match serde_json::from_str(batch) {
        Ok(records) => records,
        Err(e) => {
            error!(log_category, "could not decode batch for analytics ({e})");
            return;
        }
    };
    info!(log_category, records = records.len(), "sending customer analytics");
    for record in &records {
        if let Err(e) = sink.emit(log_category, record).await {
            error!(log_category, "could not emit analytics record ({e})");
            return;
        }
    }
}
