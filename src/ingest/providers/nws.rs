// src/ingest/providers/nws.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use reqwest::Client;
use serde_json::{Map, Value};

use super::{feature_geometry, features, pick_str};
use crate::event::{Event, SourceKind, DEFAULT_ROUTING_KEY};
use crate::ingest::http::get_json;
use crate::ingest::types::SourceProvider;

pub const NWS_ACTIVE_URL: &str = "https://api.weather.gov/alerts/active";
pub const SEVERE_ROUTING_KEY: &str = "severe";

/// Feature URL, then properties id / @id / url, then the first reference.
fn preferred_link(feature: &Map<String, Value>, props: &Map<String, Value>) -> Option<String> {
    if let Some(link) = pick_str(feature, &["id"])
        .or_else(|| pick_str(props, &["id", "@id"]))
        .or_else(|| pick_str(props, &["url"]))
    {
        return Some(link.to_string());
    }
    match props.get("references").and_then(Value::as_array)?.first()? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(r) => pick_str(r, &["url", "identifier"]).map(str::to_string),
        _ => None,
    }
}

pub fn routing_key_for(severity: Option<&str>) -> &'static str {
    match severity.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("severe") | Some("extreme") => SEVERE_ROUTING_KEY,
        _ => DEFAULT_ROUTING_KEY,
    }
}

pub fn normalize_feature(feature: &Value) -> Option<Event> {
    let f = feature.as_object()?;
    let props: Map<String, Value> = f
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let fid = pick_str(f, &["id"])
        .or_else(|| pick_str(&props, &["id", "@id"]))
        .or_else(|| pick_str(&props, &["event", "headline"]))
        .unwrap_or("nws-unknown")
        .to_string();
    let title = pick_str(&props, &["headline", "event"])
        .unwrap_or("(NWS Alert)")
        .to_string();
    let severity = pick_str(&props, &["severity"]).map(str::to_string);
    // Start-of-validity times first; 'updated' and 'ends' are last resort.
    let updated = pick_str(&props, &["effective", "onset", "sent", "updated", "ends"])
        .map(str::to_string);

    let mut ev = Event::new(fid, SourceKind::Nws.tag())
        .with_title(title)
        .with_routing_key(routing_key_for(severity.as_deref()));
    ev.severity = severity;
    ev.updated = updated;
    ev.link = preferred_link(f, &props);
    ev.geometry = feature_geometry(f);
    ev.attributes = props;
    Some(ev)
}

pub fn parse_collection(doc: &Value) -> Vec<Event> {
    let Some(feats) = features(doc) else {
        tracing::warn!(provider = "nws", "response missing 'features' list");
        return Vec::new();
    };
    let mut out = Vec::with_capacity(feats.len());
    for f in feats {
        match normalize_feature(f) {
            Some(ev) => out.push(ev),
            None => tracing::debug!(provider = "nws", "skipping malformed feature"),
        }
    }
    out
}

pub struct NwsProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: Client, url: String },
}

impl NwsProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            mode: Mode::Http {
                client,
                url: NWS_ACTIVE_URL.to_string(),
            },
        }
    }

    fn parse_str(s: &str) -> Result<Vec<Event>> {
        let t0 = std::time::Instant::now();
        let doc: Value = serde_json::from_str(s).context("parsing nws geojson")?;
        let out = parse_collection(&doc);
        histogram!("ingest_parse_ms", "provider" => "nws").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for NwsProvider {
    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_str(s),
            Mode::Http { client, url } => {
                let doc = get_json(client, url, &[]).await?;
                let out = parse_collection(&doc);
                tracing::info!(provider = "nws", events = out.len(), "normalized active alerts");
                Ok(out)
            }
        }
    }

    fn name(&self) -> &'static str {
        SourceKind::Nws.tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severe_and_extreme_route_to_severe() {
        assert_eq!(routing_key_for(Some("Extreme")), "severe");
        assert_eq!(routing_key_for(Some("severe")), "severe");
        assert_eq!(routing_key_for(Some("Moderate")), "default");
        assert_eq!(routing_key_for(None), "default");
    }

    #[test]
    fn link_falls_back_to_references() {
        let f = json!({"properties": {"references": [{"identifier": "urn:oid:2.49.0.1.840.0.abc"}]}});
        let ev = normalize_feature(&f).unwrap();
        assert_eq!(ev.link.as_deref(), Some("urn:oid:2.49.0.1.840.0.abc"));
        assert_eq!(ev.id, "nws-unknown");
        assert_eq!(ev.title, "(NWS Alert)");
    }

    #[test]
    fn updated_prefers_effective() {
        let f = json!({
            "id": "https://api.weather.gov/alerts/urn:oid:1",
            "properties": {"event": "Flood Warning", "sent": "2025-01-02T00:00:00Z",
                           "effective": "2025-01-01T00:00:00Z", "severity": "Severe"}
        });
        let ev = normalize_feature(&f).unwrap();
        assert_eq!(ev.updated.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(ev.title, "Flood Warning");
        assert_eq!(ev.routing_key, "severe");
        assert_eq!(ev.link.as_deref(), Some("https://api.weather.gov/alerts/urn:oid:1"));
    }
}
