use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Cloudflare DNS API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub zone_id: String,
    /// Falls back to CLOUDFLARE_API_TOKEN when empty
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Skip a tick while the previous cycle is still probing
    #[serde(default = "default_skip_if_busy")]
    pub skip_if_busy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

const API_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";

fn default_provider_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/srv-manager/servers.db")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5000
}

fn default_skip_if_busy() -> bool {
    true
}

fn default_listen() -> String {
    "[::]:3001".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            probe_timeout_ms: default_probe_timeout(),
            skip_if_busy: default_skip_if_busy(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if config.provider.api_token.is_empty() {
            if let Ok(token) = std::env::var(API_TOKEN_ENV) {
                config.provider.api_token = token;
            }
        }
        if config.provider.api_token.is_empty() {
            tracing::warn!("No Cloudflare API token configured; provider calls will be rejected");
        }

        Ok(config)
    }
}
