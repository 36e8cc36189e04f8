//! Configuration management (TOML file merged with CLI flags)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::relief::ScoreWeights;
use crate::tuner::Overrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Protection,
    Hunting,
}

/// On-disk configuration. Every knob is optional: unset detection values
/// stay `None` so the adaptive tuner's RAM tier can fill them in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub pressure: PressureConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub interval: Option<u64>,
    pub grace_kill: Option<u64>,
    pub docker: Option<bool>,
    pub iterm_only: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub slope: Option<f64>,
    pub growth: Option<f64>,
    pub history: Option<usize>,
    pub conf: Option<u32>,
    pub grace: Option<u64>,
    pub cool: Option<u64>,
    pub leak_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressureConfig {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub recent: Option<u64>,
    pub child_wt: Option<f64>,
    #[serde(default)]
    pub whitelist_extra: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub threshold: Option<usize>,
    pub window: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> std::path::PathBuf {
        directories::ProjectDirs::from("", "", "leakguard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| std::path::PathBuf::from("config.toml"))
    }
}

/// Fully merged runtime settings for one daemon run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub interval_s: u64,
    pub grace_kill_s: u64,
    pub mode: Mode,
    pub iterm_only: bool,
    pub docker: bool,
    pub notify_threshold: usize,
    pub notify_window_s: u64,
    pub weights: ScoreWeights,
    pub overrides: Overrides,
    pub whitelist_extra: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_s: 5,
            grace_kill_s: 3,
            mode: Mode::Protection,
            iterm_only: false,
            docker: false,
            notify_threshold: 3,
            notify_window_s: 600,
            weights: ScoreWeights::default(),
            overrides: Overrides::default(),
            whitelist_extra: Vec::new(),
        }
    }
}

impl Settings {
    /// Settings seeded from the config file; CLI flags are applied on top
    /// by the binary.
    pub fn from_config(cfg: &Config) -> Self {
        let mut s = Settings::default();
        if let Some(v) = cfg.general.interval {
            s.interval_s = v;
        }
        if let Some(v) = cfg.general.grace_kill {
            s.grace_kill_s = v;
        }
        if let Some(v) = cfg.general.docker {
            s.docker = v;
        }
        if let Some(v) = cfg.general.iterm_only {
            s.iterm_only = v;
        }
        if let Some(v) = cfg.notify.threshold {
            s.notify_threshold = v;
        }
        if let Some(v) = cfg.notify.window {
            s.notify_window_s = v;
        }
        if let Some(v) = cfg.pressure.recent {
            s.weights.recent_horizon_s = v as f64;
        }
        if let Some(v) = cfg.pressure.child_wt {
            s.weights.children = v;
        }
        s.whitelist_extra.clone_from(&cfg.pressure.whitelist_extra);

        s.overrides = Overrides {
            slope_mbpm: cfg.detection.slope,
            growth_mb: cfg.detection.growth,
            history: cfg.detection.history,
            grace_s: cfg.detection.grace.map(|v| v as f64),
            cool_s: cfg.detection.cool.map(|v| v as f64),
            high_pct: cfg.pressure.high,
            low_pct: cfg.pressure.low,
            leak_pct: cfg.detection.leak_threshold,
            conf: cfg.detection.conf,
        };
        s
    }
}
