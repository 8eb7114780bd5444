// src/event.rs
//! Normalized hazard event shared by providers, rules, dedup state and notifiers.
//!
//! Required fields are fixed struct members; everything provider specific
//! (magnitude, depth, NWS `event`, certainty, ...) lives in `attributes`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_ROUTING_KEY: &str = "default";

fn default_routing_key() -> String {
    DEFAULT_ROUTING_KEY.to_string()
}

/// `[lon, lat, ...]`; extra members (e.g. USGS depth) are kept.
pub type Position = Vec<f64>;
pub type Ring = Vec<Position>;
/// `[outer, hole, hole, ...]`
pub type PolygonCoords = Vec<Ring>;

/// GeoJSON-like geometry. Anything that is not a well-formed Point / Polygon /
/// MultiPolygon is kept verbatim as `Unsupported`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGeometry", into = "RawGeometry")]
pub enum Geometry {
    Point(Position),
    Polygon(PolygonCoords),
    MultiPolygon(Vec<PolygonCoords>),
    Unsupported { kind: String, coordinates: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawGeometry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

fn valid_position(p: &Position) -> bool {
    p.len() >= 2 && p.iter().all(|c| c.is_finite())
}

fn valid_polygon(poly: &PolygonCoords) -> bool {
    poly.iter().all(|ring| ring.iter().all(valid_position))
}

impl From<RawGeometry> for Geometry {
    fn from(raw: RawGeometry) -> Self {
        let parsed = match raw.kind.as_str() {
            "Point" => serde_json::from_value::<Position>(raw.coordinates.clone())
                .ok()
                .filter(valid_position)
                .map(Geometry::Point),
            "Polygon" => serde_json::from_value::<PolygonCoords>(raw.coordinates.clone())
                .ok()
                .filter(valid_polygon)
                .map(Geometry::Polygon),
            "MultiPolygon" => {
                serde_json::from_value::<Vec<PolygonCoords>>(raw.coordinates.clone())
                    .ok()
                    .filter(|polys| polys.iter().all(valid_polygon))
                    .map(Geometry::MultiPolygon)
            }
            _ => None,
        };
        parsed.unwrap_or(Geometry::Unsupported {
            kind: raw.kind,
            coordinates: raw.coordinates,
        })
    }
}

impl From<Geometry> for RawGeometry {
    fn from(g: Geometry) -> Self {
        let (kind, coordinates) = match g {
            Geometry::Point(p) => ("Point".to_string(), Value::from(p)),
            Geometry::Polygon(p) => ("Polygon".to_string(), serde_json::json!(p)),
            Geometry::MultiPolygon(p) => ("MultiPolygon".to_string(), serde_json::json!(p)),
            Geometry::Unsupported { kind, coordinates } => (kind, coordinates),
        };
        RawGeometry { kind, coordinates }
    }
}

impl Geometry {
    pub fn type_name(&self) -> &str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Unsupported { kind, .. } => kind,
        }
    }

    /// Parse a geometry out of a GeoJSON document: bare geometry, Feature, or
    /// FeatureCollection (first feature).
    pub fn from_geojson(doc: &Value) -> Option<Geometry> {
        match doc.get("type").and_then(Value::as_str) {
            Some("Feature") => doc.get("geometry").and_then(Self::from_geojson),
            Some("FeatureCollection") => doc
                .get("features")
                .and_then(Value::as_array)
                .and_then(|fs| fs.first())
                .and_then(Self::from_geojson),
            Some(_) => serde_json::from_value(doc.clone()).ok(),
            None => None,
        }
    }
}

/// Supported feeds. Adding a feed means adding a variant here, which makes
/// every `match` on it (threshold dispatch, formatting) a compile error until
/// handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Usgs,
    Nws,
}

impl SourceKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "usgs" => Some(SourceKind::Usgs),
            "nws" => Some(SourceKind::Nws),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SourceKind::Usgs => "usgs",
            SourceKind::Nws => "nws",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "provider")]
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Option<String>,
    /// ISO-8601; advisory recency watermark only.
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default, alias = "properties")]
    pub attributes: Map<String, Value>,
}

impl Event {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            title: String::new(),
            severity: None,
            updated: None,
            routing_key: default_routing_key(),
            link: None,
            geometry: None,
            attributes: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn with_updated(mut self, updated: impl Into<String>) -> Self {
        self.updated = Some(updated.into());
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = key.into();
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// `(source, id)`, trimmed, when both are present. Events without one of
    /// them cannot be tracked for dedup.
    pub fn dedup_key(&self) -> Option<(&str, &str)> {
        let source = self.source.trim();
        let id = self.id.trim();
        if source.is_empty() || id.is_empty() {
            None
        } else {
            Some((source, id))
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        SourceKind::from_tag(&self.source)
    }

    /// JSON number attribute; bools and numeric strings count as missing.
    pub fn number_attr(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }

    /// Non-empty, trimmed string attribute.
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
