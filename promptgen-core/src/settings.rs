//! Settings persistence module
//!
//! Loads client settings from disk, applies environment overrides,
//! and saves them back.

use crate::auth::DevUser;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";
pub const APP_NAME: &str = "PromptGen";

pub const ENV_API_URL: &str = "PROMPTGEN_API_URL";
pub const ENV_DEV_FALLBACK: &str = "PROMPTGEN_DEV_FALLBACK";

/// How the backend hands out refresh material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Refresh token returned in the response body and stored client-side
    #[default]
    Token,
    /// Refresh token kept in an http-only cookie; never stored by us
    Cookie,
}

/// Development-only login against a local allow-list.
///
/// Consulted only when the backend cannot be reached at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevFallbackSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: Vec<DevUser>,
}

/// Client settings for the session layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Backend base URL, without trailing slash
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Upper bound for every backend call (login, refresh, logout, ...)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub refresh_mode: RefreshMode,
    /// Extra attempts after a transient refresh failure
    #[serde(default = "default_refresh_retries")]
    pub refresh_retries: u32,
    /// First backoff delay; doubles per attempt
    #[serde(default = "default_refresh_backoff_ms")]
    pub refresh_backoff_ms: u64,
    /// Tokens expiring within this window are refreshed before use
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: i64,
    /// Requests whose path contains this prefix never get a bearer token
    #[serde(default = "default_auth_path_prefix")]
    pub auth_path_prefix: String,
    /// Where the session record lives (None = platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Mirror the session record into the OS keyring
    #[serde(default = "default_use_keyring")]
    pub use_keyring: bool,
    #[serde(default)]
    pub dev_fallback: DevFallbackSettings,
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_refresh_retries() -> u32 {
    2
}

fn default_refresh_backoff_ms() -> u64 {
    1000
}

fn default_expiry_skew_secs() -> i64 {
    300 // 5 minutes
}

fn default_auth_path_prefix() -> String {
    "/auth/".to_string()
}

fn default_use_keyring() -> bool {
    true
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_mode: RefreshMode::default(),
            refresh_retries: default_refresh_retries(),
            refresh_backoff_ms: default_refresh_backoff_ms(),
            expiry_skew_secs: default_expiry_skew_secs(),
            auth_path_prefix: default_auth_path_prefix(),
            data_dir: None,
            use_keyring: default_use_keyring(),
            dev_fallback: DevFallbackSettings::default(),
        }
    }
}

impl SessionSettings {
    /// Settings pointing at `api_base_url`, everything else default
    pub fn for_api(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_backoff(&self) -> Duration {
        Duration::from_millis(self.refresh_backoff_ms)
    }

    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiry_skew_secs)
    }

    /// Absolute URL for an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Directory for the session record
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join(APP_NAME)))
    }

    /// Apply `PROMPTGEN_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                info!("Using API URL from {}: {}", ENV_API_URL, url);
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(value) = std::env::var(ENV_DEV_FALLBACK) {
            let enabled = matches!(value.trim(), "1" | "true" | "yes" | "on");
            if enabled {
                warn!(
                    "{} is set: development login fallback ENABLED",
                    ENV_DEV_FALLBACK
                );
            }
            self.dev_fallback.enabled = enabled;
        }
    }
}

/// Get the settings directory path
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn get_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from the default location, falling back to defaults
pub fn load_settings() -> SessionSettings {
    match get_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("Could not determine settings path, using defaults");
            SessionSettings::default()
        }
    }
}

/// Load settings from `path`. Missing or unreadable files yield defaults.
pub fn load_settings_from(path: &Path) -> SessionSettings {
    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return SessionSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                SessionSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            SessionSettings::default()
        }
    }
}

/// Save settings to the default location
pub fn save_settings(settings: &SessionSettings) -> Result<(), String> {
    let path = get_settings_path()
        .ok_or_else(|| "Could not determine settings directory".to_string())?;
    save_settings_to(settings, &path)
}

/// Save settings to `path`, creating the parent directory
pub fn save_settings_to(settings: &SessionSettings, path: &Path) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    fs::write(path, json).map_err(|e| format!("Failed to write settings file: {}", e))?;
    info!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.api_base_url, "http://localhost:8080");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.refresh_mode, RefreshMode::Token);
        assert_eq!(settings.expiry_skew(), chrono::Duration::minutes(5));
        assert!(
            !settings.dev_fallback.enabled,
            "Dev fallback must be opt-in"
        );
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        let settings = SessionSettings::for_api("https://api.example.com/");
        assert_eq!(
            settings.endpoint("/auth/login"),
            "https://api.example.com/auth/login"
        );
        assert_eq!(
            settings.endpoint("api/prompts"),
            "https://api.example.com/api/prompts"
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{"api_base_url": "https://api.example.com", "refresh_mode": "cookie"}"#;
        let loaded: SessionSettings = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.api_base_url, "https://api.example.com");
        assert_eq!(loaded.refresh_mode, RefreshMode::Cookie);
        assert_eq!(loaded.refresh_retries, 2);
        assert_eq!(loaded.auth_path_prefix, "/auth/");
        assert!(loaded.use_keyring);
    }

    #[test]
    fn test_dev_fallback_users_deserialize() {
        let json = r#"{
            "dev_fallback": {
                "enabled": true,
                "users": [
                    {"identifier": "admin@test.com", "password": "admin123", "display_name": "Admin", "role": "admin"}
                ]
            }
        }"#;
        let loaded: SessionSettings = serde_json::from_str(json).unwrap();
        assert!(loaded.dev_fallback.enabled);
        assert_eq!(loaded.dev_fallback.users.len(), 1);
        assert_eq!(loaded.dev_fallback.users[0].role, "admin");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = SessionSettings::for_api("https://api.example.com");
        settings.refresh_retries = 0;
        save_settings_to(&settings, &path).unwrap();

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.api_base_url, "https://api.example.com");
        assert_eq!(loaded.refresh_retries, 0);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{not json").unwrap();

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.api_base_url, "http://localhost:8080");
    }
}
