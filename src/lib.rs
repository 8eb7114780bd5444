// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod event;
pub mod geo;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod rules;
pub mod state;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::event::{Event, Geometry, SourceKind};
pub use crate::ingest::types::SourceProvider;
pub use crate::notify::{DetailCache, EmailNotifier, Notifier};
pub use crate::pipeline::run_with;
pub use crate::state::DedupState;

use std::sync::Arc;

/// Build the enabled providers and the email notifier from `settings`, then
/// run the pipeline once. Returns the number of events notified.
pub async fn run(settings: &Settings) -> anyhow::Result<usize> {
    let client = ingest::http::build_client()?;
    let providers = ingest::providers_from_settings(settings, &client);
    let notifier = EmailNotifier::from_settings(settings, client, Arc::new(DetailCache::new()));
    pipeline::run_with(settings, &providers, &notifier).await
}
