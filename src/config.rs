use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::theme::ThemePreference;

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("history and theme must use different storage keys (both are {0:?})")]
    SharedStorageKey(String),
    #[error("storage keys must not be empty")]
    EmptyStorageKey,
    #[error("unsupported endpoint method: {0}")]
    UnsupportedMethod(String),
    #[error("endpoint url must not be empty")]
    EmptyUrl,
    #[error("could not build HTTP client: {0}")]
    HttpClient(String),
}

fn default_url() -> String {
    "http://localhost:8000/ask".to_string()
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_history_key() -> String {
    "chat_history".to_string()
}

fn default_theme_key() -> String {
    "theme".to_string()
}

fn default_max_input_bytes() -> usize {
    1024 * 1024
}

fn default_width() -> u32 {
    960
}

fn default_height() -> u32 {
    640
}

fn default_min_width() -> u32 {
    480
}

fn default_min_height() -> u32 {
    320
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            url: default_url(),
            method: default_method(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// SQLite file holding the key-value table. Defaults to the config directory.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_history_key")]
    pub history_key: String,
    #[serde(default = "default_theme_key")]
    pub theme_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database: None,
            history_key: default_history_key(),
            theme_key: default_theme_key(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| Config::get_config_dir().join("chat-pane.sqlite"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RendererConfig {
    /// Answers larger than this skip markdown and are shown as escaped text.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub restore_last_on_startup: bool,
    #[serde(default)]
    pub default_theme: ThemePreference,
    #[serde(default = "default_true")]
    pub notifications: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            restore_last_on_startup: false,
            default_theme: ThemePreference::default(),
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: default_width(),
            height: default_height(),
            min_width: default_min_width(),
            min_height: default_min_height(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => warn!("Error in {}: {:#}. Using defaults.", config_path.display(), e),
                },
                Err(e) => warn!("Error reading {}: {}. Using defaults.", config_path.display(), e),
            }
        } else {
            // Create config directory if it doesn't exist
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        Config::default()
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        self.endpoint.method()?;

        let history_key = self.storage.history_key.as_str();
        let theme_key = self.storage.theme_key.as_str();
        if history_key.is_empty() || theme_key.is_empty() {
            return Err(ConfigError::EmptyStorageKey);
        }
        if history_key == theme_key {
            return Err(ConfigError::SharedStorageKey(history_key.to_string()));
        }
        Ok(())
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/chat-pane")
        } else {
            PathBuf::from(".")
        }
    }
}

impl EndpointConfig {
    pub fn method(&self) -> Result<reqwest::Method, ConfigError> {
        let upper = self.method.trim().to_ascii_uppercase();
        if !SUPPORTED_METHODS.contains(&upper.as_str()) {
            return Err(ConfigError::UnsupportedMethod(self.method.clone()));
        }
        reqwest::Method::from_bytes(upper.as_bytes())
            .map_err(|_| ConfigError::UnsupportedMethod(self.method.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.endpoint.url, "http://localhost:8000/ask");
        assert_eq!(config.endpoint.method().unwrap(), reqwest::Method::POST);
        assert_eq!(config.storage.history_key, "chat_history");
        assert_eq!(config.storage.theme_key, "theme");
        assert_eq!(config.session.default_theme, ThemePreference::Light);
        assert!(config.session.notifications);
    }

    #[test]
    fn partial_sections_fill_missing_fields() {
        let config = Config::parse(
            r#"
            [endpoint]
            url = "https://example.com/api/chat"
            method = "put"

            [session]
            default_theme = "dark"
            restore_last_on_startup = true
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint.url, "https://example.com/api/chat");
        assert_eq!(config.endpoint.method().unwrap(), reqwest::Method::PUT);
        assert_eq!(config.endpoint.timeout_secs, 60);
        assert_eq!(config.session.default_theme, ThemePreference::Dark);
        assert!(config.session.restore_last_on_startup);
        assert_eq!(config.renderer.max_input_bytes, 1024 * 1024);
    }

    #[test]
    fn partial_window_section_keeps_other_sections() {
        let config = Config::parse(
            "[endpoint]\nurl = \"https://example.com/ask\"\n\n[window]\nwidth = 1200\n",
        )
        .unwrap();

        assert_eq!(config.endpoint.url, "https://example.com/ask");
        assert_eq!(config.window.width, 1200);
        assert_eq!(config.window.height, 640);
        assert_eq!(config.window.min_width, 480);
        assert_eq!(config.window.min_height, 320);
    }

    #[test]
    fn shared_storage_key_is_rejected() {
        let mut config = Config::default();
        config.storage.theme_key = config.storage.history_key.clone();
        assert_eq!(
            config.validate(),
            Err(ConfigError::SharedStorageKey("chat_history".to_string()))
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = Config::parse("[endpoint]\nmethod = \"TRACE\"\n").unwrap_err();
        assert!(err.to_string().contains("TRACE"));
    }

    #[test]
    fn explicit_database_path_wins() {
        let config = Config::parse("[storage]\ndatabase = \"/tmp/chat.sqlite\"\n").unwrap();
        assert_eq!(config.storage.database_path(), PathBuf::from("/tmp/chat.sqlite"));
    }
}
