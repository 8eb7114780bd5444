// src/pipeline.rs
//! One alerting run: fetch → filter → dedup → route → deliver → persist.
//!
//! Every stage is a gate; an empty result ends the run with `Ok(0)`. State is
//! written only after every group was handled, and only for groups that were
//! actually delivered.

use anyhow::{Context, Result};
use metrics::{counter, gauge};

use crate::config::{RoutingConfig, Settings};
use crate::event::{Event, DEFAULT_ROUTING_KEY};
use crate::ingest::{collect_events, types::SourceProvider};
use crate::metrics::ensure_metrics_described;
use crate::notify::Notifier;
use crate::rules::filter_events;
use crate::state::DedupState;

/// Group events by routing key, first-seen order, empty groups omitted.
///
/// `force_group` sends everything to one group and bypasses the other rules;
/// otherwise dropped keys are discarded and `merge` remaps what is left.
pub fn group_by_routing_key(events: Vec<Event>, routing: &RoutingConfig) -> Vec<(String, Vec<Event>)> {
    let forced = routing
        .force_group
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut groups: Vec<(String, Vec<Event>)> = Vec::new();
    for ev in events {
        let key = match forced {
            Some(f) => f.to_string(),
            None => {
                let raw = ev.routing_key.trim();
                let raw = if raw.is_empty() { DEFAULT_ROUTING_KEY } else { raw };
                if routing.drop_groups.contains(raw) {
                    tracing::debug!(id = %ev.id, routing_key = raw, "dropped by routing");
                    continue;
                }
                match routing.merge.get(raw).map(|t| t.trim()).filter(|t| !t.is_empty()) {
                    Some(target) => target.to_string(),
                    None => raw.to_string(),
                }
            }
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, evs)) => evs.push(ev),
            None => groups.push((key, vec![ev])),
        }
    }
    groups
}

/// Recipients for a routing key, falling back to the `default` list when
/// the key has none and fallback is enabled.
pub fn resolve_recipients(settings: &Settings, key: &str) -> Vec<String> {
    let lookup = |k: &str| -> Vec<String> {
        settings
            .recipients
            .get(k)
            .map(|v| {
                v.iter()
                    .map(|r| r.trim())
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let direct = lookup(key);
    if direct.is_empty() && key != DEFAULT_ROUTING_KEY && settings.app.routing.fallback_to_default {
        return lookup(DEFAULT_ROUTING_KEY);
    }
    direct
}

fn finish(notified: usize) -> Result<usize> {
    gauge!("alerts_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
    Ok(notified)
}

/// Run the pipeline with injected providers and notifier. Returns the number
/// of events delivered.
pub async fn run_with(
    settings: &Settings,
    providers: &[Box<dyn SourceProvider>],
    notifier: &dyn Notifier,
) -> Result<usize> {
    ensure_metrics_described();

    // 1) fetch
    let fetched = collect_events(providers).await?;
    if fetched.is_empty() {
        tracing::info!("no events fetched");
        return finish(0);
    }
    let fetched_n = fetched.len();

    // 2) filter
    let filtered = filter_events(fetched, &settings.thresholds, settings.app.aoi.as_ref());
    tracing::info!(fetched = fetched_n, kept = filtered.len(), "rules applied");
    if filtered.is_empty() {
        return finish(0);
    }

    // 3) dedup
    let state_path = settings.paths.state_file.as_path();
    let mut state = DedupState::load(state_path)
        .with_context(|| format!("loading state from {}", state_path.display()))?;
    if let Some(limit) = settings.state.lru_limit {
        state.set_lru_limit(limit);
    }
    let filtered_n = filtered.len();
    let fresh: Vec<Event> = filtered.into_iter().filter(|e| state.is_new(e)).collect();
    let dupes = filtered_n - fresh.len();
    if dupes > 0 {
        counter!("alerts_duplicate_total").increment(dupes as u64);
    }
    tracing::info!(new = fresh.len(), duplicates = dupes, "dedup applied");
    if fresh.is_empty() {
        return finish(0);
    }

    // 4) route
    let groups = group_by_routing_key(fresh, &settings.app.routing);
    if groups.is_empty() {
        tracing::info!("every event was dropped by routing");
        return finish(0);
    }

    // 5) deliver
    let mut delivered: Vec<Event> = Vec::new();
    for (key, events) in groups {
        let recipients = resolve_recipients(settings, &key);
        if recipients.is_empty() {
            tracing::warn!(group = %key, events = events.len(), "no recipients configured; skipping group");
            counter!("alerts_groups_skipped_total").increment(1);
            continue;
        }
        notifier
            .deliver(&key, &events, &recipients)
            .await
            .with_context(|| format!("{} delivery failed for group '{key}'", notifier.name()))?;
        tracing::info!(
            group = %key,
            events = events.len(),
            recipients = recipients.len(),
            notifier = notifier.name(),
            "group delivered"
        );
        counter!("alerts_groups_sent_total").increment(1);
        delivered.extend(events);
    }

    // 6) persist
    if delivered.is_empty() {
        return finish(0);
    }
    state.record(&delivered);
    state
        .save(state_path)
        .with_context(|| format!("saving state to {}", state_path.display()))?;
    counter!("alerts_notified_total").increment(delivered.len() as u64);
    tracing::info!(notified = delivered.len(), "run complete");
    finish(delivered.len())
}
