//! Configuration management for the Zonekeeper daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/zonekeeper/config.toml` (Windows standard)
//! 2. `~/.config/zonekeeper/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)
//!
//! # Example Config
//!
//! ```toml
//! version = 1
//!
//! [settings]
//! reset_shortcut = "ctrl+option+r"
//! focus_shortcut = "ctrl+option+f"
//!
//! [[profiles]]
//! id = 1
//! name = "Laptop"
//! display_topology.displays = [{ width = 1920, height = 1080, is_built_in = true }]
//!
//! [[profiles.regions]]
//! id = 10
//! name = "Left"
//! frame = { x = 0, y = 0, width = 960, height = 1080 }
//! assigned_apps = ["code.exe"]
//! keyboard_shortcut = "ctrl+option+1"
//! padding = 8
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zonekeeper_core::{KeyboardShortcut, Profile};
use zonekeeper_engine::EngineSettings;

/// Version written by this build.
pub const CONFIG_VERSION: u32 = 1;

/// Main configuration structure for Zonekeeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Document version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Global behaviour switches.
    pub settings: GlobalSettings,
    /// Stored profiles, one per display arrangement.
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            settings: GlobalSettings::default(),
            profiles: Vec::new(),
        }
    }
}

/// Settings that apply regardless of the active profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Switch profiles automatically when displays change.
    #[serde(default = "default_true")]
    pub auto_switch_profiles: bool,

    /// Place windows of assigned apps as they launch.
    #[serde(default = "default_true")]
    pub reposition_on_launch: bool,

    /// Never launch a stopped app from the switcher.
    #[serde(default = "default_false")]
    pub confirm_before_launch: bool,

    /// Moves the foreground window back into its region.
    #[serde(default)]
    pub reset_shortcut: Option<KeyboardShortcut>,

    /// Pins the foreground window into the focus region.
    #[serde(default)]
    pub focus_shortcut: Option<KeyboardShortcut>,

    /// Border drawn around the pinned window.
    #[serde(default)]
    pub focus_border: FocusBorderConfig,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            auto_switch_profiles: true,
            reposition_on_launch: true,
            confirm_before_launch: false,
            reset_shortcut: None,
            focus_shortcut: None,
            focus_border: FocusBorderConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl GlobalSettings {
    /// The subset the engine acts on.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            auto_switch_profiles: self.auto_switch_profiles,
            reposition_on_launch: self.reposition_on_launch,
            confirm_before_launch: self.confirm_before_launch,
            reset_shortcut: self.reset_shortcut,
            focus_shortcut: self.focus_shortcut,
        }
    }
}

/// Cosmetic border settings. Stored and passed through only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusBorderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Border width in pixels.
    #[serde(default = "default_border_width")]
    pub width: u32,

    /// Border color as `#RRGGBB`.
    #[serde(default = "default_border_color")]
    pub color: String,
}

impl Default for FocusBorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_border_width(),
            color: default_border_color(),
        }
    }
}

// Default value functions for serde
fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_border_width() -> u32 {
    4
}

fn default_border_color() -> String {
    "#3B82F6".to_string()
}

/// A value that was corrected during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Load configuration from the first existing file in [`config_paths`].
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Correct values the engine cannot use and report each correction.
    ///
    /// Negative padding is clamped to zero and shortcuts without modifiers
    /// are dropped.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version > CONFIG_VERSION {
            warnings.push(ConfigWarning::new(
                "version",
                format!("version {} is newer than {}; unknown fields are ignored", self.version, CONFIG_VERSION),
            ));
        }

        for (field, slot) in [
            ("settings.reset_shortcut", &mut self.settings.reset_shortcut),
            ("settings.focus_shortcut", &mut self.settings.focus_shortcut),
        ] {
            if let Some(Err(e)) = slot.as_ref().map(KeyboardShortcut::validate) {
                warnings.push(ConfigWarning::new(field, format!("{}; shortcut ignored", e)));
                *slot = None;
            }
        }

        let mut seen_ids = std::collections::HashSet::new();
        self.profiles.retain(|profile| {
            if seen_ids.insert(profile.id) {
                return true;
            }
            warnings.push(ConfigWarning::new(
                format!("profiles.{}", profile.id),
                format!("duplicate profile id, '{}' ignored", profile.name),
            ));
            false
        });

        for profile in &mut self.profiles {
            for region in &mut profile.regions {
                let field = format!("profiles.{}.regions.{}", profile.id, region.id);
                if region.padding < 0 {
                    warnings.push(ConfigWarning::new(
                        format!("{}.padding", field),
                        format!("padding {} is negative, using 0", region.padding),
                    ));
                    region.padding = 0;
                }
                if let Some(Err(e)) = region.keyboard_shortcut.as_ref().map(KeyboardShortcut::validate) {
                    warnings.push(ConfigWarning::new(
                        format!("{}.keyboard_shortcut", field),
                        format!("{}; shortcut ignored", e),
                    ));
                    region.keyboard_shortcut = None;
                }
                if region.frame.is_degenerate() {
                    warnings.push(ConfigWarning::new(
                        format!("{}.frame", field),
                        "frame has no area; windows placed here will be invisible",
                    ));
                }
            }
        }

        let level = self.settings.log_level.to_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            warnings.push(ConfigWarning::new(
                "settings.log_level",
                format!("unknown level '{}', using info", self.settings.log_level),
            ));
            self.settings.log_level = default_log_level();
        }

        warnings
    }
}

pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/zonekeeper/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("com", "zonekeeper", "zonekeeper") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/zonekeeper/config.toml
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("zonekeeper").join("config.toml"));
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
