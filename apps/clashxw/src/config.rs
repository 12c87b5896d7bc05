//! Tray settings.
//!
//! Settings are stored as TOML:
//! - Linux: `~/.config/clashxw/settings.toml`
//! - Windows: `%APPDATA%/clashxw/settings.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tray settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the engine's external controller.
    #[serde(default = "default_controller_url")]
    pub controller_url: String,

    /// Controller secret, sent as a Bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Web dashboard opened from the menu.
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,

    /// Directory scanned for engine config files.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Config file the engine should run with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_config: Option<PathBuf>,

    /// First command identifier of the tray menu.
    #[serde(default = "default_menu_start_id")]
    pub menu_start_id: u32,

    /// How long a tray click waits for fresh engine state, in milliseconds.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
}

fn default_controller_url() -> String {
    "http://127.0.0.1:9090".into()
}

fn default_dashboard_url() -> String {
    "http://127.0.0.1:9090/ui".into()
}

fn default_config_dir() -> PathBuf {
    settings_dir().join("configs")
}

fn default_menu_start_id() -> u32 {
    clashxw_tray::DEFAULT_START_ID
}

fn default_refresh_timeout_ms() -> u64 {
    1500
}

/// Command identifiers the native menu can report back.
const MENU_ID_RANGE: std::ops::RangeInclusive<u32> = 1..=i32::MAX as u32;

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_url: default_controller_url(),
            secret: None,
            dashboard_url: default_dashboard_url(),
            config_dir: default_config_dir(),
            current_config: None,
            menu_start_id: default_menu_start_id(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
        }
    }
}

impl Settings {
    /// Loads settings from disk, or creates a default file if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut settings: Settings = toml::from_str(&content)?;
            settings.validate();
            Ok(settings)
        } else {
            let settings = Settings::default();
            settings.save_to(path)?;
            Ok(settings)
        }
    }

    /// Replaces out-of-range values with their defaults.
    fn validate(&mut self) {
        if !MENU_ID_RANGE.contains(&self.menu_start_id) {
            tracing::warn!(
                menu_start_id = self.menu_start_id,
                fallback = default_menu_start_id(),
                "menu_start_id out of range, using default"
            );
            self.menu_start_id = default_menu_start_id();
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold the controller secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Config file to reload, falling back to the first one found.
    pub fn active_config(&self, available: &[PathBuf]) -> Option<PathBuf> {
        self.current_config
            .clone()
            .or_else(|| available.first().cloned())
    }
}

fn settings_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("clashxw")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("clashxw")
    }
}

/// Returns the platform-specific settings file path.
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.toml")
}
