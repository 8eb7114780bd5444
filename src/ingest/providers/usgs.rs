// src/ingest/providers/usgs.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::histogram;
use reqwest::Client;
use serde_json::{Map, Value};

use super::{feature_geometry, features, pick_str};
use crate::config::Settings;
use crate::event::{Event, Geometry, SourceKind};
use crate::ingest::http::get_json;
use crate::ingest::types::SourceProvider;

pub const USGS_FDSN_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";
const FALLBACK_MIN_MAGNITUDE: f64 = 2.5;

/// Epoch milliseconds → `YYYY-MM-DDTHH:MM:SSZ`.
fn iso_from_ms(v: Option<&Value>) -> Option<String> {
    let ms = v.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Magnitude bucket, capitalized like NWS severities.
pub fn severity_from_magnitude(mag: f64) -> &'static str {
    match mag {
        m if m < 3.0 => "Minor",
        m if m < 4.0 => "Light",
        m if m < 5.0 => "Moderate",
        m if m < 6.0 => "Strong",
        m if m < 7.0 => "Major",
        _ => "Great",
    }
}

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize one GeoJSON feature. `None` for features that are not objects.
pub fn normalize_feature(feature: &Value) -> Option<Event> {
    let f = feature.as_object()?;
    let mut props: Map<String, Value> = f
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let geometry = feature_geometry(f);

    let mag = number(props.get("mag"));
    let updated = iso_from_ms(props.get("updated")).or_else(|| iso_from_ms(props.get("time")));
    let title = pick_str(&props, &["title"])
        .map(str::to_string)
        .unwrap_or_else(|| match mag {
            Some(m) => format!("M {m:.1}"),
            None => "Earthquake".to_string(),
        });
    let link = pick_str(&props, &["url"]).map(str::to_string);

    // USGS puts depth (km) in the third coordinate.
    if let Some(Geometry::Point(p)) = &geometry {
        if let Some(depth) = p.get(2) {
            props
                .entry("depth_km")
                .or_insert_with(|| Value::from(*depth));
        }
    }

    let fid = f
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| title.clone());

    let mut ev = Event::new(fid, SourceKind::Usgs.tag()).with_title(title);
    ev.severity = mag.map(|m| severity_from_magnitude(m).to_string());
    ev.updated = updated;
    ev.link = link;
    ev.geometry = geometry;
    ev.attributes = props;
    Some(ev)
}

/// Normalize a FeatureCollection, skipping malformed features.
pub fn parse_collection(doc: &Value) -> Vec<Event> {
    let Some(feats) = features(doc) else {
        tracing::warn!(provider = "usgs", "response missing 'features' list");
        return Vec::new();
    };
    let mut out = Vec::with_capacity(feats.len());
    for f in feats {
        match normalize_feature(f) {
            Some(ev) => out.push(ev),
            None => tracing::debug!(provider = "usgs", "skipping malformed feature"),
        }
    }
    out
}

pub struct UsgsProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: Client,
        url: String,
        min_magnitude: f64,
        window_minutes: u32,
        limit: u32,
    },
}

impl UsgsProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    /// Query window and minimum magnitude come from settings; the feed is
    /// asked for nothing below the configured earthquake threshold.
    pub fn from_settings(settings: &Settings, client: Client) -> Self {
        let min_magnitude = settings
            .thresholds
            .earthquake
            .as_ref()
            .and_then(|t| t.min_magnitude)
            .unwrap_or(FALLBACK_MIN_MAGNITUDE);
        Self {
            mode: Mode::Http {
                client,
                url: USGS_FDSN_URL.to_string(),
                min_magnitude,
                window_minutes: settings.usgs.window_minutes,
                limit: settings.usgs.limit,
            },
        }
    }

    fn parse_str(s: &str) -> Result<Vec<Event>> {
        let t0 = std::time::Instant::now();
        let doc: Value = serde_json::from_str(s).context("parsing usgs geojson")?;
        let out = parse_collection(&doc);
        histogram!("ingest_parse_ms", "provider" => "usgs").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for UsgsProvider {
    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_str(s),
            Mode::Http {
                client,
                url,
                min_magnitude,
                window_minutes,
                limit,
            } => {
                let end = Utc::now();
                let start = end - Duration::minutes(i64::from(*window_minutes));
                let query = [
                    ("format", "geojson".to_string()),
                    ("starttime", start.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    ("endtime", end.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    ("minmagnitude", format!("{min_magnitude:.1}")),
                    ("limit", limit.to_string()),
                ];
                let doc = get_json(client, url, &query).await?;
                let out = parse_collection(&doc);
                tracing::info!(
                    provider = "usgs",
                    events = out.len(),
                    min_magnitude = *min_magnitude,
                    "normalized recent earthquakes"
                );
                Ok(out)
            }
        }
    }

    fn name(&self) -> &'static str {
        SourceKind::Usgs.tag()
    }
}
