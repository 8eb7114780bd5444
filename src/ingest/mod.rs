// src/ingest/mod.rs
pub mod http;
pub mod providers;
pub mod types;

use anyhow::{bail, Result};
use metrics::counter;
use reqwest::Client;

use crate::config::Settings;
use crate::event::{Event, DEFAULT_ROUTING_KEY};
use crate::ingest::providers::{nws::NwsProvider, usgs::UsgsProvider};
use crate::ingest::types::SourceProvider;
use crate::metrics::ensure_metrics_described;

/// Providers enabled in `[app.providers]`, in a stable order.
pub fn providers_from_settings(settings: &Settings, client: &Client) -> Vec<Box<dyn SourceProvider>> {
    let toggles = settings.app.providers;
    let mut out: Vec<Box<dyn SourceProvider>> = Vec::new();
    if toggles.nws {
        out.push(Box::new(NwsProvider::from_client(client.clone())));
    }
    if toggles.usgs {
        out.push(Box::new(UsgsProvider::from_settings(settings, client.clone())));
    }
    if out.is_empty() {
        tracing::info!("no providers enabled");
    }
    out
}

/// Fill defaults the rest of the pipeline relies on and enforce the required
/// fields. A record without an id means a broken provider, which is fatal.
fn admit(mut ev: Event, provider: &str, index: usize) -> Result<Event> {
    if ev.source.trim().is_empty() {
        ev.source = provider.to_string();
    }
    if ev.routing_key.trim().is_empty() {
        ev.routing_key = DEFAULT_ROUTING_KEY.to_string();
    }
    if ev.dedup_key().is_none() {
        bail!("event #{index} from provider '{provider}' missing required 'id'/'source'");
    }
    Ok(ev)
}

/// Fetch from every provider. One failing provider is logged and skipped;
/// a malformed record from any provider fails the whole call.
pub async fn collect_events(providers: &[Box<dyn SourceProvider>]) -> Result<Vec<Event>> {
    ensure_metrics_described();

    let mut out = Vec::new();
    for p in providers {
        let batch = match p.fetch_latest().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, provider = p.name(), "provider error");
                counter!("alerts_provider_errors_total", "provider" => p.name()).increment(1);
                continue;
            }
        };
        for (i, ev) in batch.into_iter().enumerate() {
            out.push(admit(ev, p.name(), i)?);
        }
    }

    counter!("alerts_fetched_total").increment(out.len() as u64);
    tracing::info!(
        events = out.len(),
        providers = providers.len(),
        "fetched events"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_tags_missing_source_and_routing_key() {
        let mut ev = Event::new("abc", "");
        ev.routing_key = "  ".into();
        let ev = admit(ev, "nws", 0).unwrap();
        assert_eq!(ev.source, "nws");
        assert_eq!(ev.routing_key, "default");
    }

    #[test]
    fn admit_rejects_missing_id() {
        let err = admit(Event::new("", "usgs"), "usgs", 3).unwrap_err();
        assert!(err.to_string().contains("#3"));
    }
}
