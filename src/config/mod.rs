// src/config/mod.rs
pub mod settings;

pub use settings::{
    AppConfig, EarthquakeThresholds, EmailConfig, GlobalThresholds, RoutingConfig, Settings,
    Thresholds, WeatherThresholds,
};
