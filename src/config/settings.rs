// src/config/settings.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::event::Geometry;
use crate::rules::severity_rank;

pub const ENV_CONFIG_PATH: &str = "DISASTER_ALERTS_CONFIG";
pub const ENV_STATE_FILE: &str = "DISASTER_ALERTS_STATE_FILE";
pub const ENV_STATE_LRU: &str = "DISASTER_ALERTS_STATE_LRU";

const DEFAULT_STATE_FILE: &str = "state/state.json";
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}
fn default_window_minutes() -> u32 {
    60
}
fn default_usgs_limit() -> u32 {
    200
}

/// Everything one pipeline run needs. Read-only once loaded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppConfig,
    pub thresholds: Thresholds,
    /// routing key → recipient addresses
    pub recipients: HashMap<String, Vec<String>>,
    pub paths: PathsConfig,
    pub state: StateConfig,
    pub usgs: UsgsConfig,
    /// Credentials never come from the config file.
    #[serde(skip)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub providers: ProviderToggles,
    /// Inline area of interest (Polygon / MultiPolygon).
    #[serde(default)]
    pub aoi: Option<Geometry>,
    /// GeoJSON file with the area of interest; used when `aoi` is absent.
    #[serde(default)]
    pub aoi_path: Option<PathBuf>,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// IANA zone for times shown in messages, e.g. "America/Los_Angeles".
    #[serde(default)]
    pub display_timezone: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            providers: ProviderToggles::default(),
            aoi: None,
            aoi_path: None,
            routing: RoutingConfig::default(),
            display_timezone: None,
        }
    }
}

impl AppConfig {
    /// Configured display zone; unset or unknown names fall back to UTC.
    pub fn display_tz(&self) -> Tz {
        let Some(name) = self
            .display_timezone
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Tz::UTC;
        };
        match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!(error = %e, timezone = name, "unknown display_timezone; using UTC");
                Tz::UTC
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProviderToggles {
    #[serde(default = "default_true")]
    pub usgs: bool,
    #[serde(default = "default_true")]
    pub nws: bool,
}

impl Default for ProviderToggles {
    fn default() -> Self {
        Self {
            usgs: true,
            nws: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Send every event to this single group.
    #[serde(default)]
    pub force_group: Option<String>,
    #[serde(default)]
    pub drop_groups: BTreeSet<String>,
    /// source key → target key
    #[serde(default)]
    pub merge: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub fallback_to_default: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            force_group: None,
            drop_groups: BTreeSet::new(),
            merge: HashMap::new(),
            fallback_to_default: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub global: GlobalThresholds,
    pub earthquake: Option<EarthquakeThresholds>,
    pub weather: Option<WeatherThresholds>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GlobalThresholds {
    /// Label on the shared severity scale, e.g. "moderate" or "strong".
    pub min_severity: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EarthquakeThresholds {
    pub min_magnitude: Option<f64>,
    pub max_depth_km: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeatherThresholds {
    /// Case-insensitive substrings; when non-empty an event must match one.
    pub include_events: Vec<String>,
    pub exclude_events: Vec<String>,
    pub wind_gust_mps: Option<f64>,
    pub rainfall_mm_hr: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Per-source id capacity; the state file's own value applies when unset.
    pub lru_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsgsConfig {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_usgs_limit")]
    pub limit: u32,
}

impl Default for UsgsConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            limit: default_usgs_limit(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            user: None,
            password: None,
            from: None,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EmailConfig {
    /// SMTP_HOST, SMTP_USER, SMTP_PASS, NOTIFY_EMAIL_FROM (defaults to the user).
    pub fn from_env() -> Self {
        Self {
            smtp_host: env_nonempty("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            user: env_nonempty("SMTP_USER"),
            password: env_nonempty("SMTP_PASS"),
            from: env_nonempty("NOTIFY_EMAIL_FROM"),
        }
    }

    /// `(user, password, from)` or an error naming what is missing.
    pub fn require(&self) -> Result<(&str, &str, &str)> {
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("email credentials missing: SMTP_USER is not set"))?;
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("email credentials missing: SMTP_PASS is not set"))?;
        let from = self.from.as_deref().unwrap_or(user);
        Ok((user, password, from))
    }
}

impl Settings {
    /// Load from an explicit TOML or JSON file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut settings = parse_settings(&content, &ext)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        settings.finalize(path.parent())?;
        Ok(settings)
    }

    /// Lookup order:
    /// 1) $DISASTER_ALERTS_CONFIG
    /// 2) config/settings.toml
    /// 3) config/settings.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
        }
        for candidate in ["config/settings.toml", "config/settings.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        tracing::info!("no settings file found; using defaults");
        let mut settings = Settings::default();
        settings.finalize(None)?;
        Ok(settings)
    }

    /// Apply env overrides, resolve `aoi_path`, read credentials.
    fn finalize(&mut self, base_dir: Option<&Path>) -> Result<()> {
        if let Some(p) = env_nonempty(ENV_STATE_FILE) {
            self.paths.state_file = PathBuf::from(p);
        }
        if let Some(raw) = env_nonempty(ENV_STATE_LRU) {
            match raw.parse::<usize>() {
                Ok(n) => self.state.lru_limit = Some(n),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid {ENV_STATE_LRU}"),
            }
        }

        if self.app.aoi.is_none() {
            if let Some(rel) = self.app.aoi_path.clone() {
                let path = match base_dir {
                    Some(dir) if rel.is_relative() => dir.join(&rel),
                    _ => rel,
                };
                self.app.aoi = Some(load_aoi_file(&path)?);
            }
        }

        if let Some(min) = self.thresholds.global.min_severity.as_deref() {
            if !min.trim().is_empty() && severity_rank(Some(min)) == 0 {
                tracing::warn!(
                    min_severity = min,
                    "unrecognized min_severity; it ranks 0 and filters nothing"
                );
            }
        }

        self.email = EmailConfig::from_env();
        Ok(())
    }
}

/// Read an AOI from a GeoJSON geometry, Feature or FeatureCollection file.
pub fn load_aoi_file(path: &Path) -> Result<Geometry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading AOI from {}", path.display()))?;
    let doc: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing AOI GeoJSON {}", path.display()))?;
    Geometry::from_geojson(&doc).ok_or_else(|| anyhow!("no geometry found in {}", path.display()))
}

fn parse_settings(s: &str, hint_ext: &str) -> Result<Settings> {
    match hint_ext {
        "json" => Ok(serde_json::from_str(s)?),
        "toml" => Ok(toml::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str::<Settings>(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported settings format: {e}"))
        }
    }
}
