//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SOUQ_CLIENT_ID=abc-123                                             │
//! │     SOUQ_SYNC_ENDPOINT=wss://sync.example.com/live                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/souq-sync/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.souq.sync/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated client_id, 5 retries, 1s..30s backoff               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [client]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Back Office"
//! tenant_id = "tenant-001"
//!
//! [sync]
//! endpoint = "wss://sync.example.com/live"
//! max_retries = 5
//! initial_backoff_ms = 1000
//! max_backoff_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Client Configuration
// =============================================================================

/// Identity of this client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unique client identifier (UUID v4).
    /// Auto-generated on first run if not provided. Stamped into every
    /// outbound message as the origin; inbound messages carrying it are
    /// self-echoes and are suppressed.
    pub id: String,

    /// Human-readable client name (e.g. "Back Office", "Warehouse Tablet").
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Tenant this client belongs to.
    #[serde(default)]
    pub tenant_id: String,
}

fn default_client_name() -> String {
    "Souq Client".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            id: Uuid::new_v4().to_string(),
            name: default_client_name(),
            tenant_id: String::new(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Connection and retry behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// WebSocket endpoint of the remote authority, if known ahead of time.
    /// `connect()` may also receive an explicit endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum consecutive failed connection attempts before the engine
    /// gives up and reports `CONNECTION_FAILED`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff floor (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff cap (milliseconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// A session that dies within this window (seconds) counts as a flap
    /// and degrades the reported connection quality.
    #[serde(default = "default_flap_window")]
    pub flap_window_secs: u64,

    /// Outbound queue size at which a warning is logged.
    #[serde(default = "default_queue_warn")]
    pub queue_warn_threshold: usize,
}

fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_flap_window() -> u64 {
    30
}
fn default_queue_warn() -> usize {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            endpoint: None,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            connect_timeout_secs: default_connect_timeout(),
            flap_window_secs: default_flap_window(),
            queue_warn_threshold: default_queue_warn(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Client identity.
    #[serde(default)]
    pub client: ClientConfig,

    /// Connection and retry settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated client ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.client.id.is_empty() {
            return Err(SyncError::MissingClientId);
        }

        if let Some(ref url) = self.sync.endpoint {
            validate_endpoint(url)?;
        }

        if self.sync.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("SOUQ_CLIENT_ID") {
            debug!(client_id = %id, "Overriding client ID from environment");
            self.client.id = id;
        }

        if let Ok(name) = std::env::var("SOUQ_CLIENT_NAME") {
            self.client.name = name;
        }

        if let Ok(tenant) = std::env::var("SOUQ_TENANT_ID") {
            self.client.tenant_id = tenant;
        }

        if let Ok(url) = std::env::var("SOUQ_SYNC_ENDPOINT") {
            debug!(url = %url, "Overriding sync endpoint from environment");
            self.sync.endpoint = Some(url);
        }

        if let Ok(retries) = std::env::var("SOUQ_MAX_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.sync.max_retries = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "souq", "sync")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the client ID.
    pub fn client_id(&self) -> &str {
        &self.client.id
    }

    /// Returns the configured endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        self.sync.endpoint.as_deref()
    }

    /// Backoff floor as a `Duration`.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    /// Backoff cap as a `Duration`.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.max_backoff_ms)
    }

    /// Connection timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.connect_timeout_secs)
    }

    /// Flap window as a `Duration`.
    pub fn flap_window(&self) -> Duration {
        Duration::from_secs(self.sync.flap_window_secs)
    }
}

/// Checks that an endpoint is a parseable ws:// or wss:// URL.
pub(crate) fn validate_endpoint(url: &str) -> SyncResult<url::Url> {
    let parsed = url::Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(SyncError::InvalidUrl(format!(
            "Endpoint must use ws:// or wss://, got: {}://",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.client.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.initial_backoff_ms, 1000);
        assert_eq!(config.sync.max_backoff_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.client.id = String::new();
        assert!(config.validate().is_err());

        config.client.id = "client-1".to_string();
        config.sync.endpoint = Some("http://not-websocket".to_string());
        assert!(config.validate().is_err());

        config.sync.endpoint = Some("wss://sync.example.com/live".to_string());
        assert!(config.validate().is_ok());

        config.sync.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(validate_endpoint("ws://localhost:8080/sync").is_ok());
        assert!(validate_endpoint("wss://sync.example.com").is_ok());
        assert!(validate_endpoint("https://example.com").is_err());
        assert!(validate_endpoint("::definitely not a url::").is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[client]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.client.id, config.client.id);
        assert_eq!(parsed.sync.max_retries, config.sync.max_retries);
    }
}
