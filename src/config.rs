//! Configuration management for the HUE 9000 panel

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::phases::PanelSettings;
use crate::state::Theme;
use crate::timeline::PlayOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Startup sequence configuration
    #[serde(default)]
    pub startup: StartupConfig,

    /// Initial panel state
    #[serde(default)]
    pub panel: PanelConfig,

    /// Resistive shutdown configuration
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Log filtering and retention
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Pause after every phase until the next step is requested
    #[serde(default)]
    pub step_through_mode: bool,

    /// Start the sequence as soon as the driver is up
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Playback speed multiplier
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Animation scheduler tick (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_initial_theme")]
    pub initial_theme: Theme,

    /// Theme applied when the sequence reaches its theme transition
    #[serde(default = "default_interactive_theme")]
    pub interactive_theme: Theme,

    /// Lens power percentage (0-100)
    #[serde(default = "default_lens_power")]
    pub initial_lens_power: f64,

    #[serde(default = "default_dial_a_hue")]
    pub dial_a_hue: f64,

    #[serde(default)]
    pub dial_b_hue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Whether the resistive shutdown controller runs
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for the panel's own modules when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Per-module levels, keyed by module path below the crate (e.g. `timeline`)
    #[serde(default)]
    pub modules: BTreeMap<String, String>,

    /// Days to keep rotated log files; 0 keeps them forever
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_tick_interval() -> u64 {
    16 // ~60 updates per second
}

fn default_initial_theme() -> Theme {
    Theme::Dim
}

fn default_interactive_theme() -> Theme {
    Theme::Dark
}

fn default_lens_power() -> f64 {
    25.0
}

fn default_dial_a_hue() -> f64 {
    183.0
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            step_through_mode: false,
            auto_start: true,
            time_scale: default_time_scale(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            initial_theme: default_initial_theme(),
            interactive_theme: default_interactive_theme(),
            initial_lens_power: default_lens_power(),
            dial_a_hue: default_dial_a_hue(),
            dial_b_hue: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            modules: BTreeMap::new(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults there when it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;

            config.config_path = Some(path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "hue9000", "panel")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Scheduler options; a non-positive time scale falls back to 1.0
    pub fn play_options(&self) -> PlayOptions {
        let time_scale = if self.startup.time_scale.is_finite() && self.startup.time_scale > 0.0 {
            self.startup.time_scale
        } else {
            default_time_scale()
        };
        PlayOptions {
            time_scale,
            tick: Duration::from_millis(self.startup.tick_interval_ms.max(1)),
        }
    }

    /// Settings handed to the startup phases
    pub fn panel_settings(&self) -> PanelSettings {
        PanelSettings {
            interactive_theme: self.panel.interactive_theme,
            dial_a_hue: self.panel.dial_a_hue,
            dial_b_hue: self.panel.dial_b_hue,
            lens_power: self.panel.initial_lens_power,
        }
    }
}
