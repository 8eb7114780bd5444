// src/metrics.rs
//! Run metrics. The binary installs a Prometheus recorder and can dump the
//! exposition text to a file after each run (node_exporter textfile style),
//! since a one-shot process has no endpoint to scrape.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;

pub const ENV_METRICS_PATH: &str = "DISASTER_ALERTS_METRICS_PATH";

/// One-time metrics registration (so series carry descriptions).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("alerts_fetched_total", "Events returned by providers.");
        describe_counter!(
            "alerts_rejected_total",
            "Events rejected by the rules engine, by reason."
        );
        describe_counter!(
            "alerts_duplicate_total",
            "Events suppressed because they were already notified."
        );
        describe_counter!("alerts_notified_total", "Events delivered to recipients.");
        describe_counter!("alerts_groups_sent_total", "Routing groups delivered.");
        describe_counter!(
            "alerts_groups_skipped_total",
            "Routing groups skipped for lack of recipients."
        );
        describe_counter!(
            "alerts_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!(
            "alerts_pipeline_last_run_ts",
            "Unix ts when the pipeline last completed."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Write the current exposition text to `path` atomically.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.handle.render();
        crate::state::write_atomic(path, body.as_bytes())
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}
