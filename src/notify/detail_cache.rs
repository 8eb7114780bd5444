// src/notify/detail_cache.rs
//! Per-process cache of event detail documents (URL → JSON).
//!
//! Used only to enrich messages with a WKT line. Failed fetches are cached as
//! an empty document so one bad URL costs one request per process.

use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::{Event, Geometry};
use crate::geo::to_wkt;
use crate::ingest::http::get_json;

static RE_USGS_EVENTPAGE: OnceCell<Regex> = OnceCell::new();

/// Human-facing pages → machine-readable endpoints, where known.
pub fn normalize_detail_url(url: &str) -> String {
    let re = RE_USGS_EVENTPAGE.get_or_init(|| {
        Regex::new(r"^https?://earthquake\.usgs\.gov/earthquakes/eventpage/([^/?#]+)")
            .expect("eventpage regex")
    });
    match re.captures(url).and_then(|c| c.get(1)) {
        Some(id) => format!(
            "https://earthquake.usgs.gov/earthquakes/feed/v1.0/detail/{}.geojson",
            id.as_str()
        ),
        None => url.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct DetailCache {
    docs: Mutex<HashMap<String, Arc<Value>>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Value>>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, url: &str) -> Option<Arc<Value>> {
        self.lock().get(url).cloned()
    }

    pub fn insert(&self, url: impl Into<String>, doc: Value) {
        self.lock().insert(url.into(), Arc::new(doc));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached document for `url`, fetching it on first use. Never fails.
    pub async fn get_or_fetch(&self, client: &Client, url: &str) -> Arc<Value> {
        if let Some(doc) = self.get(url) {
            return doc;
        }
        let doc = match get_json(client, url, &[]).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = ?e, url, "detail fetch failed");
                Value::Object(Map::new())
            }
        };
        self.lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(doc))
            .clone()
    }

    /// WKT for an event: from its detail document when the link (or id) is an
    /// http(s) URL, else from the event's own geometry.
    pub async fn wkt_for_event(&self, client: &Client, ev: &Event) -> Option<String> {
        let link = ev
            .link
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ev.id.trim());
        if link.starts_with("http") {
            let doc = self.get_or_fetch(client, &normalize_detail_url(link)).await;
            if let Some(w) = Geometry::from_geojson(&doc).as_ref().and_then(to_wkt) {
                return Some(w);
            }
        }
        ev.geometry.as_ref().and_then(to_wkt)
    }

    /// One entry per event, aligned with `events`.
    pub async fn wkts_for(&self, client: &Client, events: &[Event]) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(events.len());
        for ev in events {
            out.push(self.wkt_for_event(client, ev).await);
        }
        out
    }
}
