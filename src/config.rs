// src/config.rs

//! Configuration for the engine surface bridge.
//!
//! Every section derives `Default`, and `#[serde(default)]` lets a config file
//! name only the settings it changes. The file is JSON and is located through
//! the `ENGINE_BRIDGE_CONFIG` environment variable.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_ENV_VAR: &str = "ENGINE_BRIDGE_CONFIG";

pub const DEFAULT_REFRESH_RATE_HZ: f64 = 60.0;
pub const MIN_REFRESH_RATE_HZ: f64 = 1.0;
pub const MAX_REFRESH_RATE_HZ: f64 = 240.0;

/// Clamps a refresh rate to the supported range; NaN becomes the default.
pub fn clamp_refresh_rate(hz: f64) -> f64 {
    if hz.is_nan() {
        return DEFAULT_REFRESH_RATE_HZ;
    }
    hz.clamp(MIN_REFRESH_RATE_HZ, MAX_REFRESH_RATE_HZ)
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub symbols: SymbolConfig,
    pub scheduler: SchedulerConfig,
    pub binder: BinderConfig,
    pub view: ViewConfig,
}

impl Config {
    /// Loads the file named by `ENGINE_BRIDGE_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn load_or_default() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(Path::new(&path)),
            None => {
                info!("Config: {} not set, using defaults", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Config: Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid bridge configuration")
    }
}

/// Where the engine's entry points come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SymbolConfig {
    /// Library names tried in order; the first that opens wins.
    pub library_candidates: Vec<String>,
    /// Resolve against symbols already loaded into the process when no
    /// candidate opens.
    pub fallback_to_process: bool,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        SymbolConfig {
            library_candidates: vec![
                "libgodot.dylib".to_string(),
                "libgodot.macos.template_debug.dev.arm64.dylib".to_string(),
                "libgodot.so".to_string(),
            ],
            fallback_to_process: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between availability checks while the engine is not up.
    pub availability_poll_ms: u64,
    /// Rate of the software refresh source.
    pub refresh_rate_hz: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            availability_poll_ms: 120,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.availability_poll_ms)
    }

    pub fn refresh_rate(&self) -> f64 {
        clamp_refresh_rate(self.refresh_rate_hz)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinderConfig {
    pub retry_interval_ms: u64,
    /// Failed attempts tolerated per attach cycle before giving up.
    pub max_attempts: u32,
}

impl Default for BinderConfig {
    fn default() -> Self {
        BinderConfig {
            retry_interval_ms: 150,
            max_attempts: 300,
        }
    }
}

impl BinderConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewConfig {
    /// Title hint pushed to the engine window after binding.
    pub window_title: String,
    /// Scale used when the host reports none.
    pub default_scale: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            window_title: "Engine Embedded".to_string(),
            default_scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config = Config::from_json(r#"{ "binder": { "max_attempts": 5 } }"#).unwrap();

        assert_eq!(config.binder.max_attempts, 5);
        assert_eq!(config.binder.retry_interval_ms, 150);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(config.symbols.fallback_to_process);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Config::from_json("{ not json").is_err());
    }

    #[test]
    fn refresh_rate_is_clamped() {
        let mut scheduler = SchedulerConfig::default();
        scheduler.refresh_rate_hz = 10_000.0;
        assert_eq!(scheduler.refresh_rate(), 240.0);
        scheduler.refresh_rate_hz = 0.0;
        assert_eq!(scheduler.refresh_rate(), 1.0);
        scheduler.refresh_rate_hz = f64::NAN;
        assert_eq!(scheduler.refresh_rate(), 60.0);
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = Config::from_path(Path::new("/nonexistent/bridge.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/bridge.json"));
    }
}
