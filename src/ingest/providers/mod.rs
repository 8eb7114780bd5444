// src/ingest/providers/mod.rs
pub mod nws;
pub mod usgs;

use serde_json::{Map, Value};

use crate::event::Geometry;

/// First non-empty, trimmed string among `keys` of a JSON object.
pub(crate) fn pick_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// `features` array of a FeatureCollection; `None` if the document has none.
pub(crate) fn features(doc: &Value) -> Option<&Vec<Value>> {
    doc.get("features").and_then(Value::as_array)
}

/// Feature geometry; `null`/absent → `None`.
pub(crate) fn feature_geometry(feature: &Map<String, Value>) -> Option<Geometry> {
    match feature.get("geometry") {
        None | Some(Value::Null) => None,
        Some(g) => serde_json::from_value(g.clone()).ok(),
    }
}
