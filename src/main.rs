//! disaster-alerts: one pipeline run per invocation (cron / systemd timer).
//!
//! Usage: `disaster-alerts [CONFIG_PATH]`

use anyhow::Result;
use disaster_alerts::metrics::{Metrics, ENV_METRICS_PATH};
use disaster_alerts::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENV_LOG_JSON: &str = "DISASTER_ALERTS_LOG_JSON";

/// `RUST_LOG` wins; otherwise the configured `app.log_level`.
/// `DISASTER_ALERTS_LOG_JSON=1` switches to one JSON object per line.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .init();
}

fn load_settings() -> Result<Settings> {
    match std::env::args_os().nth(1) {
        Some(p) => Settings::load_from(&PathBuf::from(p)),
        None => Settings::load_default(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let settings = match load_settings() {
        Ok(s) => s,
        Err(e) => {
            // No subscriber yet.
            eprintln!("disaster-alerts: failed to load settings: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.app.log_level);

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    let result = disaster_alerts::run(&settings).await;

    if let (Some(m), Ok(path)) = (&metrics, std::env::var(ENV_METRICS_PATH)) {
        if let Err(e) = m.write_textfile(&PathBuf::from(path)) {
            tracing::warn!(error = ?e, "failed to write metrics textfile");
        }
    }

    match result {
        Ok(n) => {
            tracing::info!(notified = n, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = ?e, "run failed");
            ExitCode::FAILURE
        }
    }
}
