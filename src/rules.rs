// src/rules.rs
//! Rules engine: decides which raw events are actionable.
//!
//! Three gates, evaluated short-circuit in this order:
//! 1. global minimum severity on a shared 0..=4 rank scale,
//! 2. per-source thresholds (USGS magnitude/depth, NWS categories/gust/rain),
//! 3. area-of-interest containment.
//!
//! Pure: no I/O, no state. Missing numeric values never reject an event.

use metrics::counter;

use crate::config::{EarthquakeThresholds, Thresholds, WeatherThresholds};
use crate::event::{Event, Geometry, SourceKind};
use crate::geo;

pub const RANK_UNKNOWN: u8 = 0;

/// Map a free-text severity onto the shared scale.
///
/// NWS: Minor / Moderate / Severe / Extreme. USGS magnitude buckets:
/// Minor / Light / Moderate / Strong / Major / Great.
pub fn severity_rank(name: Option<&str>) -> u8 {
    let Some(name) = name else {
        return RANK_UNKNOWN;
    };
    match name.trim().to_ascii_lowercase().as_str() {
        "minor" | "light" => 1,
        "moderate" => 2,
        "severe" | "strong" => 3,
        "extreme" | "major" | "great" => 4,
        _ => RANK_UNKNOWN,
    }
}

/// Which gate rejected an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Severity,
    SourceThreshold,
    OutsideAoi,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Severity => "severity",
            Rejection::SourceThreshold => "source_threshold",
            Rejection::OutsideAoi => "outside_aoi",
        }
    }
}

pub fn passes_global_severity(e: &Event, thresholds: &Thresholds) -> bool {
    let Some(min) = thresholds
        .global
        .min_severity
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    else {
        return true;
    };
    severity_rank(e.severity.as_deref()) >= severity_rank(Some(min))
}

// ---------------------------------------------------------------------------
// Per-source thresholds
// ---------------------------------------------------------------------------

/// Magnitude and depth (km) as reported; `None` when not numeric.
pub fn earthquake_values(e: &Event) -> (Option<f64>, Option<f64>) {
    // `magnitude` is consulted only when `mag` is absent, not when it is malformed.
    let mag = if e.attributes.contains_key("mag") {
        e.number_attr("mag")
    } else {
        e.number_attr("magnitude")
    };
    let depth = e
        .number_attr("depth_km")
        .or_else(|| e.number_attr("depth"))
        .or_else(|| match &e.geometry {
            Some(Geometry::Point(p)) => p.get(2).copied(),
            _ => None,
        });
    (mag, depth)
}

fn passes_earthquake(e: &Event, thr: Option<&EarthquakeThresholds>) -> bool {
    let Some(thr) = thr else {
        return true;
    };
    let (mag, depth) = earthquake_values(e);
    if let (Some(min), Some(m)) = (thr.min_magnitude, mag) {
        if m < min {
            return false;
        }
    }
    if let (Some(max), Some(d)) = (thr.max_depth_km, depth) {
        if d > max {
            return false;
        }
    }
    true
}

/// NWS category text: `event` attribute, else the title.
pub fn weather_event_text(e: &Event) -> &str {
    e.str_attr("event").unwrap_or_else(|| e.title.trim())
}

fn matches_any(patterns: &[String], text: &str) -> bool {
    let t = text.to_lowercase();
    patterns.iter().any(|p| t.contains(&p.to_lowercase()))
}

fn passes_weather(e: &Event, thr: Option<&WeatherThresholds>) -> bool {
    let Some(thr) = thr else {
        return true;
    };

    let text = weather_event_text(e);
    if !thr.include_events.is_empty() && !matches_any(&thr.include_events, text) {
        return false;
    }
    if !thr.exclude_events.is_empty() && matches_any(&thr.exclude_events, text) {
        return false;
    }

    if let (Some(min), Some(g)) = (thr.wind_gust_mps, e.number_attr("wind_gust_mps")) {
        if g < min {
            return false;
        }
    }
    if let (Some(min), Some(r)) = (thr.rainfall_mm_hr, e.number_attr("rainfall_mm_hr")) {
        if r < min {
            return false;
        }
    }
    true
}

pub fn passes_source_thresholds(e: &Event, thresholds: &Thresholds) -> bool {
    match e.source_kind() {
        Some(SourceKind::Usgs) => passes_earthquake(e, thresholds.earthquake.as_ref()),
        Some(SourceKind::Nws) => passes_weather(e, thresholds.weather.as_ref()),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Area of interest
// ---------------------------------------------------------------------------

/// No AOI, no geometry, or no usable point → keep. Otherwise containment.
pub fn in_aoi(e: &Event, aoi: Option<&Geometry>) -> bool {
    let Some(aoi) = aoi else {
        return true;
    };
    let Some(pt) = e.geometry.as_ref().and_then(geo::representative_point) else {
        return true;
    };
    geo::aoi_contains(aoi, pt)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn evaluate(e: &Event, thresholds: &Thresholds, aoi: Option<&Geometry>) -> Result<(), Rejection> {
    if !passes_global_severity(e, thresholds) {
        return Err(Rejection::Severity);
    }
    if !passes_source_thresholds(e, thresholds) {
        return Err(Rejection::SourceThreshold);
    }
    if !in_aoi(e, aoi) {
        return Err(Rejection::OutsideAoi);
    }
    Ok(())
}

/// Order-preserving filter; surviving events are returned untouched.
pub fn filter_events(
    events: Vec<Event>,
    thresholds: &Thresholds,
    aoi: Option<&Geometry>,
) -> Vec<Event> {
    let mut out = Vec::with_capacity(events.len());
    for e in events {
        match evaluate(&e, thresholds, aoi) {
            Ok(()) => out.push(e),
            Err(reason) => {
                tracing::debug!(
                    id = %e.id,
                    source = %e.source,
                    reason = reason.as_str(),
                    "event rejected by rules"
                );
                counter!("alerts_rejected_total", "reason" => reason.as_str()).increment(1);
            }
        }
    }
    out
}
