use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::provider::Device;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_session_path")]
    pub session_path: String,
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    #[serde(default = "default_render_target")]
    pub default_render_target: String,
    /// Media server URL for backends that need one besides the token.
    #[serde(default)]
    pub media_server_url: Option<String>,
    /// Cameras announced by the native shell, for backends without
    /// their own video device enumeration.
    #[serde(default)]
    pub video_devices: Vec<Device>,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_token_path() -> String {
    "/api/generate-token".to_string()
}

fn default_session_path() -> String {
    "/api/create-session".to_string()
}

fn default_token_lifetime_secs() -> u64 {
    24 * 60 * 60
}

fn default_render_target() -> String {
    "video-container".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token_path: default_token_path(),
            session_path: default_session_path(),
            token_lifetime_secs: default_token_lifetime_secs(),
            default_render_target: default_render_target(),
            media_server_url: None,
            video_devices: Vec::new(),
        }
    }
}

impl Settings {
    pub fn token_lifetime(&self) -> Duration {
        let secs = i64::try_from(self.token_lifetime_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Settings persisted as `settings.json` inside a data directory.
pub struct SettingsStore {
    settings: Settings,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings,
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.settings.clone()
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn set_api_base_url(&mut self, url: String) {
        self.settings.api_base_url = url;
        self.save();
    }

    pub fn set_media_server_url(&mut self, url: Option<String>) {
        self.settings.media_server_url = url;
        self.save();
    }

    pub fn set_default_render_target(&mut self, target: String) {
        self.settings.default_render_target = target;
        self.save();
    }

    fn save(&self) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create settings directory: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(&self.settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt {}: {e}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
