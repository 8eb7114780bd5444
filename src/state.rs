// src/state.rs
//! Durable dedup memory: which `(source, id)` pairs were already notified.
//!
//! Each source keeps a most-recent-first id list capped at `lru_limit` plus an
//! advisory `last_updated` watermark. The watermark is bookkeeping only and is
//! never consulted by [`DedupState::is_new`]; feeds may deliver late or revised
//! records older than it.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::event::Event;

pub const STATE_VERSION: u32 = 1;
pub const DEFAULT_LRU_LIMIT: usize = 5000;

fn default_version() -> u32 {
    STATE_VERSION
}

fn default_lru_limit() -> usize {
    std::env::var(crate::config::settings::ENV_STATE_LRU)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_LRU_LIMIT)
}

// Field-level salvage: a parsed document keeps whatever is well-formed and
// wrongly typed values fall back to their defaults.

fn lenient_version<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(STATE_VERSION))
}

fn lenient_lru_limit<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    let v = Value::deserialize(d)?;
    let n = match &v {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    Ok(n.filter(|n| *n > 0).unwrap_or_else(default_lru_limit))
}

fn lenient_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Non-object entries are skipped.
fn lenient_providers<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, SourceState>, D::Error> {
    let Value::Object(map) = Value::deserialize(d)? else {
        return Ok(BTreeMap::new());
    };
    let mut out = BTreeMap::new();
    for (name, entry) in map {
        if !entry.is_object() {
            tracing::warn!(source = %name, "skipping malformed state entry");
            continue;
        }
        match serde_json::from_value::<SourceState>(entry) {
            Ok(ps) => {
                out.insert(name, ps);
            }
            Err(e) => tracing::warn!(error = %e, source = %name, "skipping malformed state entry"),
        }
    }
    Ok(out)
}

/// Parse the ISO-8601 subset feeds actually emit into UTC.
///
/// Accepts `Z`, numeric offsets, fractional seconds, and naive timestamps
/// (taken as UTC).
pub fn parse_iso8601(ts: &str) -> Option<DateTime<Utc>> {
    let s = ts.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// `a` strictly newer than `b`. An unparseable `a` is never newer; an
/// absent/unparseable `b` is older than anything valid.
pub fn is_newer(a: Option<&str>, b: Option<&str>) -> bool {
    let Some(da) = a.and_then(parse_iso8601) else {
        return false;
    };
    match b.and_then(parse_iso8601) {
        Some(db) => da > db,
        None => true,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    /// Most recent first.
    #[serde(default, deserialize_with = "lenient_ids")]
    pub ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<String>,
}

impl SourceState {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|x| x == id)
    }

    /// Move `id` to the front (or insert it there) and cap the list.
    pub fn touch(&mut self, id: &str, lru_limit: usize) {
        if self.ids.first().map(String::as_str) == Some(id) {
            return;
        }
        if let Some(pos) = self.ids.iter().position(|x| x == id) {
            self.ids.remove(pos);
        }
        self.ids.insert(0, id.to_string());
        self.ids.truncate(lru_limit);
    }

    pub fn consider_updated(&mut self, updated: &str) {
        if is_newer(Some(updated), self.last_updated.as_deref()) {
            self.last_updated = Some(updated.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupState {
    #[serde(default = "default_version", deserialize_with = "lenient_version")]
    pub version: u32,
    #[serde(default = "default_lru_limit", deserialize_with = "lenient_lru_limit")]
    pub lru_limit: usize,
    #[serde(default, deserialize_with = "lenient_providers")]
    pub providers: BTreeMap<String, SourceState>,
}

impl Default for DedupState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            lru_limit: default_lru_limit(),
            providers: BTreeMap::new(),
        }
    }
}

impl DedupState {
    pub fn with_lru_limit(lru_limit: usize) -> Self {
        let mut s = Self::default();
        s.set_lru_limit(lru_limit);
        s
    }

    /// Apply a capacity (minimum 1), trimming lists that exceed it.
    pub fn set_lru_limit(&mut self, lru_limit: usize) {
        self.lru_limit = lru_limit.max(1);
        for ps in self.providers.values_mut() {
            ps.ids.truncate(self.lru_limit);
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceState> {
        self.providers.get(name)
    }

    pub fn ids(&self, source: &str) -> &[String] {
        self.providers
            .get(source)
            .map(|s| s.ids.as_slice())
            .unwrap_or_default()
    }

    pub fn last_updated(&self, source: &str) -> Option<&str> {
        self.providers
            .get(source)
            .and_then(|s| s.last_updated.as_deref())
    }

    /// True unless this `(source, id)` was recorded before. Events without an
    /// id or source cannot be tracked and are always new.
    pub fn is_new(&self, event: &Event) -> bool {
        let Some((source, id)) = event.dedup_key() else {
            return true;
        };
        self.providers
            .get(source)
            .map_or(true, |ps| !ps.contains(id))
    }

    /// Remember a batch of delivered events and advance per-source watermarks
    /// to the newest `updated` of the batch.
    pub fn record(&mut self, events: &[Event]) {
        let limit = self.lru_limit.max(1);
        let mut batch_max: HashMap<&str, &str> = HashMap::new();

        for e in events {
            let Some((source, id)) = e.dedup_key() else {
                continue;
            };
            self.providers
                .entry(source.to_string())
                .or_default()
                .touch(id, limit);

            if let Some(updated) = e.updated.as_deref() {
                let prev = batch_max.get(source).copied();
                if is_newer(Some(updated), prev) {
                    batch_max.insert(source, updated);
                }
            }
        }

        for (source, newest) in batch_max {
            if let Some(ps) = self.providers.get_mut(source) {
                ps.consider_updated(newest);
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Load from `path`.
    ///
    /// Missing file → empty state. A document that is not JSON (or not an
    /// object) → moved aside to `<name>.bak` (only if no backup exists yet,
    /// otherwise deleted) and an empty state is returned so the run can
    /// proceed. Inside a parsed document, wrongly typed values are dropped
    /// and the well-formed entries are kept.
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }

        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "state not found; starting fresh");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading state {}", path.display()));
            }
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(anyhow::Error::from)
            .and_then(|doc| match doc {
                Value::Object(_) => Ok(serde_json::from_value::<DedupState>(doc)?),
                other => anyhow::bail!("expected a JSON object, got {}", json_kind(&other)),
            });
        match parsed {
            Ok(mut state) => {
                state.lru_limit = state.lru_limit.max(1);
                Ok(state)
            }
            Err(err) => {
                let backup = backup_path(path);
                let moved = if backup.exists() {
                    fs::remove_file(path)
                } else {
                    fs::rename(path, &backup)
                };
                if let Err(e) = moved {
                    tracing::warn!(error = %e, path = %path.display(), "could not set corrupt state aside");
                }
                tracing::warn!(
                    error = %err,
                    path = %path.display(),
                    backup = %backup.display(),
                    "state was corrupt; reset to empty"
                );
                Ok(Self::default())
            }
        }
    }

    /// Write atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        if let Some(dir) = dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing state")?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("writing state {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            sources = self.providers.len(),
            "state saved"
        );
        Ok(())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".bak");
    PathBuf::from(p)
}

/// Temp file next to `path`, flushed and fsynced, then renamed over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let written = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    sync_parent_dir(path);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)?;
    f.flush()?;
    f.sync_all()
}

/// Persist the rename itself; failure here does not undo the write.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
