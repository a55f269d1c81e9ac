use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub housekeeping: HousekeepingConfig,
    pub node: NodeConfig,
    pub presence: PresenceConfig,
    pub relay: RelayConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How often an online device refreshes its `lastSeenAt`
    pub heartbeat_interval: Duration,
    /// A device whose `lastSeenAt` is older than this is effectively offline
    pub stale_threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Shared secret for the cleanup endpoint. Unset disables the endpoint.
    pub secret: Option<String>,
    pub presence_max_age: Duration,
    pub transfer_max_age: Duration,
    /// Run a sweep in-process on this period (unset: only on request)
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub catbox_url: String,
    /// Lowercase extensions, with the leading dot
    pub catbox_extensions: Vec<String>,
    pub transfer_sh_url: String,
    pub timeout: Duration,
}

pub const DEFAULT_CATBOX_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".zip", ".js", ".mp4", ".webm", ".pdf",
];

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            secret: None,
            presence_max_age: Duration::from_secs(24 * 60 * 60),
            transfer_max_age: Duration::from_secs(12 * 60 * 60),
            interval: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            catbox_url: "https://catbox.moe/user/api.php".to_string(),
            catbox_extensions: DEFAULT_CATBOX_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            transfer_sh_url: "https://transfer.sh".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200 * 1024 * 1024); // 200MB, catbox's own limit

        let presence = PresenceConfig {
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS").unwrap_or(Duration::from_secs(30)),
            stale_threshold: env_secs("STALE_THRESHOLD_SECS").unwrap_or(Duration::from_secs(60)),
        };

        let housekeeping_defaults = HousekeepingConfig::default();
        let housekeeping = HousekeepingConfig {
            secret: std::env::var("CLEANUP_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            presence_max_age: env_secs("PRESENCE_MAX_AGE_SECS")
                .unwrap_or(housekeeping_defaults.presence_max_age),
            transfer_max_age: env_secs("TRANSFER_MAX_AGE_SECS")
                .unwrap_or(housekeeping_defaults.transfer_max_age),
            interval: env_secs("CLEANUP_INTERVAL_SECS").filter(|d| !d.is_zero()),
        };

        let relay_defaults = RelayConfig::default();
        let relay = RelayConfig {
            catbox_url: std::env::var("CATBOX_URL").unwrap_or(relay_defaults.catbox_url),
            catbox_extensions: std::env::var("CATBOX_EXTENSIONS")
                .map(|e| parse_extensions(&e))
                .unwrap_or(relay_defaults.catbox_extensions),
            transfer_sh_url: std::env::var("TRANSFER_SH_URL")
                .unwrap_or(relay_defaults.transfer_sh_url),
            timeout: env_secs("RELAY_TIMEOUT_SECS").unwrap_or(relay_defaults.timeout),
        };

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            housekeeping,
            presence,
            relay,
            test_mode,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.presence.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "HEARTBEAT_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.presence.stale_threshold <= self.presence.heartbeat_interval {
            return Err(ConfigError::ValidationError(
                "STALE_THRESHOLD_SECS must be greater than HEARTBEAT_INTERVAL_SECS".to_string(),
            ));
        }

        if self.presence.stale_threshold < self.presence.heartbeat_interval * 2 {
            tracing::warn!(
                "Stale threshold is less than two heartbeat intervals. \
                 A single late heartbeat will make a device appear offline."
            );
        }

        if self.housekeeping.secret.is_none() {
            tracing::warn!("CLEANUP_SECRET is not set; the cleanup endpoint will reject every request");
        }

        Ok(())
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

/// Parse a comma-separated extension list, normalizing to lowercase with a
/// leading dot. An empty list means "any extension".
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}
