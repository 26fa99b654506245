use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::canvas::{BOUNDARY_INK_THRESHOLD, Color};
use crate::components::state::{HISTORY_CAPACITY, MAX_STATE_BYTES, StoragePolicy};
use crate::components::tools::MOVE_THROTTLE_MS;
use crate::error::{EngineError, Result};
use crate::ops::fill::FillPolicy;

const SETTINGS_FILE: &str = "colorbook.toml";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Engine-wide tunables. Every field has a default, so partial files load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub fill: FillPolicy,
    /// Run fills on the session worker thread instead of the caller's thread.
    pub use_worker: bool,
    pub history_capacity: usize,
    pub state_ttl_days: u32,
    pub max_state_bytes: usize,
    pub move_throttle_ms: u64,
    pub pencil_size: u32,
    pub eraser_size: u32,
    /// Hex color the eraser paints with.
    pub erase_color: String,
    pub boundary_ink_threshold: u8,
    /// Where `FileStore` keeps coloring state; `None` means the data dir.
    pub state_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fill: FillPolicy::default(),
            use_worker: true,
            history_capacity: HISTORY_CAPACITY,
            state_ttl_days: 7,
            max_state_bytes: MAX_STATE_BYTES,
            move_throttle_ms: MOVE_THROTTLE_MS,
            pencil_size: 4,
            eraser_size: 20,
            erase_color: Color::WHITE.to_hex(),
            boundary_ink_threshold: BOUNDARY_INK_THRESHOLD,
            state_dir: None,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/colorbook/colorbook.toml  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Colorbook\colorbook.toml
    /// On macOS:   ~/Library/Application Support/Colorbook/colorbook.toml
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("colorbook");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("Colorbook").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Colorbook")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Load settings from the platform path (defaults if missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            warn!("settings: {} unusable, using defaults: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| EngineError::Settings(e.to_string()))?;
        let mut tmp = path.to_path_buf();
        tmp.set_extension("new");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn erase_color(&self) -> Color {
        Color::parse_hex(&self.erase_color).unwrap_or_else(|_| {
            warn!("settings: bad erase_color {:?}, using white", self.erase_color);
            Color::WHITE
        })
    }

    pub fn storage_policy(&self) -> StoragePolicy {
        StoragePolicy {
            ttl_ms: i64::from(self.state_ttl_days) * DAY_MS,
            max_bytes: self.max_state_bytes,
            history_capacity: self.history_capacity.max(1),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| crate::logger::data_dir().join("Colorbook").join("state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_keeps_defaults() {
        let s = EngineSettings::from_toml(
            r##"
            use_worker = false
            erase_color = "#FFFFF0"

            [fill]
            tolerance = 40
            "##,
        )
        .unwrap();
        assert!(!s.use_worker);
        assert_eq!(s.fill.tolerance, 40);
        assert_eq!(s.fill.max_points, FillPolicy::default().max_points);
        assert_eq!(s.history_capacity, 20);
        assert_eq!(s.erase_color(), Color::rgb(255, 255, 240));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        assert!(matches!(
            EngineSettings::from_toml("use_worker = \"maybe\""),
            Err(EngineError::Toml(_))
        ));
    }

    #[test]
    fn policy_from_settings() {
        let policy = EngineSettings::default().storage_policy();
        assert_eq!(policy, StoragePolicy::default());
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("colorbook-settings-{}", uuid::Uuid::new_v4()));
        let path = dir.join(SETTINGS_FILE);
        let mut s = EngineSettings::default();
        s.pencil_size = 9;
        s.state_dir = Some(dir.join("state"));
        s.save_to(&path).unwrap();
        assert_eq!(EngineSettings::load_from(&path).unwrap(), s);
        let _ = fs::remove_dir_all(&dir);
    }
}
