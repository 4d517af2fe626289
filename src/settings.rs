use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_CAPACITY;
use crate::components::history::HistoryLimits;
use crate::components::tools::BrushSettings;
use crate::error::Result;
use crate::ops::smoothing::DEFAULT_PASSES;

/// Engine configuration, stored as JSON. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub brush_radius: f32,
    pub smoothing_kernel: usize,
    pub smoothing_passes: usize,
    /// Rest time before a stroke snaps to a straight line.
    pub quickline_delay_ms: u64,
    pub quickline_tolerance: f32,
    /// Decoded images kept in memory.
    pub cache_capacity: usize,
    /// Neighbours on each side decoded ahead of navigation.
    pub prefetch_radius: usize,
    /// `None` keeps every undo step.
    pub max_undo_steps: Option<usize>,
    pub max_undo_bytes: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            brush_radius: 12.0,
            smoothing_kernel: 5,
            smoothing_passes: DEFAULT_PASSES,
            quickline_delay_ms: 1000,
            quickline_tolerance: 4.0,
            cache_capacity: DEFAULT_CAPACITY,
            prefetch_radius: 1,
            max_undo_steps: None,
            max_undo_bytes: None,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/labelfe/settings.json  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\LabelFE\settings.json
    /// On macOS:   ~/Library/Application Support/LabelFE/settings.json
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("labelfe");
            return Some(config_dir.join("settings.json"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("LabelFE").join("settings.json"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("LabelFE")
                    .join("settings.json"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("labelfe_settings.json")))
        }
    }

    /// Load from the platform path. Missing or corrupt files give defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("ignoring settings at {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn brush_settings(&self) -> BrushSettings {
        BrushSettings {
            radius: self.brush_radius.max(0.5),
            quickline_delay: Duration::from_millis(self.quickline_delay_ms),
            quickline_tolerance: self.quickline_tolerance.max(0.0),
        }
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_steps: self.max_undo_steps,
            max_bytes: self.max_undo_bytes,
        }
    }
}
