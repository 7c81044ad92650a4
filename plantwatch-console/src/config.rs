//! Console configuration
//!
//! Handles:
//! - API base URL and request timeout
//! - Realtime socket path and reconnect policy
//! - Window capacities for charts, logs and analytics
//! - Where the session is persisted (file or OS keyring)
//!
//! Sources, later wins: built-in defaults, `config.toml`, `.env`/environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "PLANTWATCH_CONFIG";
pub const API_URL_ENV: &str = "PLANTWATCH_API_URL";
pub const SOCKET_PATH_ENV: &str = "PLANTWATCH_SOCKET_PATH";

const APP_DIR: &str = "plantwatch";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not find a configuration directory")]
    NoConfigDir,
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub windows: WindowConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub socket_path: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub chart_points: usize,
    pub log_entries: usize,
    pub analytics_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackendKind,
    /// Overrides the session file location for the `file` backend
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendKind {
    File,
    Keyring,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            socket_path: "/monitoring/socket.io".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            chart_points: 50,
            log_entries: 100,
            analytics_points: 200,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackendKind::File,
            file: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

impl ConsoleConfig {
    /// Load config from `PLANTWATCH_CONFIG` or the OS-specific location,
    /// then apply environment overrides.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path()?;
        let mut config = Self::load_from(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults.
    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid { key: "api.timeout_secs", reason: "must be at least 1" });
        }
        Ok(())
    }

    /// Save config to the location `load` reads from
    pub async fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_file_path()?;
        self.save_to(&path).await?;
        Ok(path)
    }

    /// Save config, creating the parent directory if needed
    pub async fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api.url = url.trim().to_string();
        }
        if let Some(path) = lookup(SOCKET_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.realtime.socket_path = path.trim().to_string();
        }
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(explicit));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(APP_DIR);
        path.push("config.toml");
        Ok(path)
    }

    pub fn is_first_time_setup() -> bool {
        Self::config_file_path().map(|p| !p.exists()).unwrap_or(true)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.realtime.reconnect_delay_ms)
    }

    pub fn session_file_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(file) = &self.session.file {
            return Ok(file.clone());
        }
        let mut path = dirs::data_local_dir()
            .or_else(dirs::config_dir)
            .ok_or(ConfigError::NoConfigDir)?;
        path.push(APP_DIR);
        path.push("session.json");
        Ok(path)
    }

    /// WebSocket endpoint of the Socket.IO server (Engine.IO v4)
    pub fn socket_url(&self) -> String {
        let base = self.api.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            format!("ws://{base}")
        };

        let path = self.realtime.socket_path.trim_end_matches('/');
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        format!("{ws_base}{path}/?EIO=4&transport=websocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ConsoleConfig::default();
        assert_eq!(config.api.timeout_secs, 60);
        assert_eq!(config.realtime.reconnect_attempts, 5);
        assert_eq!(config.realtime.reconnect_delay_ms, 5_000);
        assert_eq!(config.windows.chart_points, 50);
        assert_eq!(config.windows.log_entries, 100);
        assert_eq!(config.session.backend, SessionBackendKind::File);
    }

    #[test]
    fn test_socket_url_from_api_url() {
        let mut config = ConsoleConfig::default();
        config.api.url = "https://plant.example.com/".into();
        assert_eq!(
            config.socket_url(),
            "wss://plant.example.com/monitoring/socket.io/?EIO=4&transport=websocket"
        );

        config.api.url = "10.0.0.4:8080".into();
        config.realtime.socket_path = "socket.io/".into();
        assert_eq!(config.socket_url(), "ws://10.0.0.4:8080/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(API_URL_ENV, " http://172.26.80.134 "), (SOCKET_PATH_ENV, "")].into();
        let mut config = ConsoleConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api.url, "http://172.26.80.134");
        assert_eq!(config.realtime.socket_path, "/monitoring/socket.io");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[api]\nurl = \"http://plant:9000\"\n\n[session]\nbackend = \"keyring\"\n")
            .await
            .unwrap();

        let config = ConsoleConfig::load_from(&path).await.unwrap();
        assert_eq!(config.api.url, "http://plant:9000");
        assert_eq!(config.api.timeout_secs, 60);
        assert_eq!(config.session.backend, SessionBackendKind::Keyring);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[api]\ntimeout_secs = 0\n").await.unwrap();

        let err = ConsoleConfig::load_from(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "api.timeout_secs", .. }));

        tokio::fs::write(&path, "[api]\ntimeout_secs = 1\n").await.unwrap();
        let config = ConsoleConfig::load_from(&path).await.unwrap();
        assert_eq!(config.api.timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ConsoleConfig::default();
        config.windows.analytics_points = 120;
        config.save_to(&path).await.unwrap();

        assert_eq!(ConsoleConfig::load_from(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let config = ConsoleConfig::load_from(Path::new("/definitely/not/here.toml")).await.unwrap();
        assert_eq!(config, ConsoleConfig::default());
    }
}
