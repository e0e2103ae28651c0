use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GalleryError, Result};

/// Top-level configuration for the gallery sync service.
///
/// Loaded from `~/.ai-gallery/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl GalleryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GalleryConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparsable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GalleryError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite store, session file and API token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Local API port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.ai-gallery/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Message bridge and handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// URL of the hosted gallery page the bridge is attached to.
    pub page_url: String,
    /// Query parameter that asks the page to pull a staged sync payload.
    pub sync_flag: String,
    /// Session-storage key holding the staged sync payload.
    pub staged_key: String,
    /// Delay before the page announces readiness unprompted.
    pub ready_delay_ms: u64,
    /// Largest inbound native-messaging frame accepted.
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            page_url: "http://localhost:3040/gallery".to_string(),
            sync_flag: "sync".to_string(),
            staged_key: "gallery_sync_data".to_string(),
            ready_delay_ms: 500,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// Remote upsert endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    /// Base URL of the hosted backend, e.g. `https://project.example.co`.
    pub base_url: String,
    /// Key sent as `apikey` and bearer credential.
    pub api_key: String,
    /// Table receiving the upserted rows.
    pub table: String,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            table: "gallery_images".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Caller identity. No `user_id` means unauthenticated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub user_id: Option<String>,
}
