//! # Hailmeter Configuration
//!
//! Configuration for the driver-side trip engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HAILMETER_BACKEND_URL=https://api.example.com/v1                   │
//! │     HAILMETER_DRIVER_ID=drv-42                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/hailmeter/hailmeter.toml (Linux)                         │
//! │     ~/Library/Application Support/com.hailmeter.hailmeter/ (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [driver]
//! id = "drv-42"
//! name = "Cab 42"
//!
//! [backend]
//! base_url = "https://api.example.com/v1"
//! request_timeout_secs = 15
//!
//! [outbox]
//! drain_interval_secs = 30
//! drain_timeout_secs = 60
//! max_backoff_secs = 3600
//!
//! [meter]
//! snapshot_flush_ms = 1500
//! start_fix_timeout_ms = 5000
//! end_fix_timeout_ms = 3000
//!
//! [database]
//! path = "/var/lib/hailmeter/hailmeter.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

const CONFIG_FILE: &str = "hailmeter.toml";
const DATABASE_FILE: &str = "hailmeter.db";

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Backend driver identifier, sent with every completion.
    #[serde(default)]
    pub id: Option<String>,

    /// Display name (vehicle or driver), used only in logs.
    #[serde(default)]
    pub name: Option<String>,
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Completion API root, http:// or https://.
    /// When unset, every trip is saved locally.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Outbox
// =============================================================================

/// Drain scheduling for the offline outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Interval between opportunistic background drains (seconds).
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Upper bound for a single drain pass (seconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Cap on the per-entry exponential backoff (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_drain_interval() -> u64 {
    30
}
fn default_drain_timeout() -> u64 {
    60
}
fn default_max_backoff() -> u64 {
    3600
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            drain_interval_secs: default_drain_interval(),
            drain_timeout_secs: default_drain_timeout(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl OutboxSettings {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// =============================================================================
// Meter
// =============================================================================

/// Timing for the trip controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSettings {
    /// Snapshot flush period while a trip runs (milliseconds).
    #[serde(default = "default_snapshot_flush")]
    pub snapshot_flush_ms: u64,

    /// How long `start_trip` waits for a first fix (milliseconds).
    #[serde(default = "default_start_fix_timeout")]
    pub start_fix_timeout_ms: u64,

    /// How long `end_trip` waits for a fresh fix (milliseconds).
    #[serde(default = "default_end_fix_timeout")]
    pub end_fix_timeout_ms: u64,
}

fn default_snapshot_flush() -> u64 {
    1_500
}
fn default_start_fix_timeout() -> u64 {
    5_000
}
fn default_end_fix_timeout() -> u64 {
    3_000
}

impl Default for MeterSettings {
    fn default() -> Self {
        MeterSettings {
            snapshot_flush_ms: default_snapshot_flush(),
            start_fix_timeout_ms: default_start_fix_timeout(),
            end_fix_timeout_ms: default_end_fix_timeout(),
        }
    }
}

impl MeterSettings {
    pub fn snapshot_flush(&self) -> Duration {
        Duration::from_millis(self.snapshot_flush_ms)
    }

    pub fn start_fix_timeout(&self) -> Duration {
        Duration::from_millis(self.start_fix_timeout_ms)
    }

    pub fn end_fix_timeout(&self) -> Duration {
        Duration::from_millis(self.end_fix_timeout_ms)
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HailmeterConfig {
    #[serde(default)]
    pub driver: DriverSettings,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub meter: MeterSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl HailmeterConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (hailmeter.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
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
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref raw) = self.backend.base_url {
            let url = Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Backend URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.outbox.drain_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "drain_interval_secs must be greater than 0".into(),
            ));
        }
        if self.outbox.drain_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "drain_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.meter.snapshot_flush_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "snapshot_flush_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `HAILMETER_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("HAILMETER_DRIVER_ID") {
            debug!(driver_id = %id, "Overriding driver ID from environment");
            self.driver.id = Some(id);
        }

        if let Some(name) = lookup("HAILMETER_DRIVER_NAME") {
            self.driver.name = Some(name);
        }

        if let Some(url) = lookup("HAILMETER_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.backend.base_url = Some(url);
        }

        if let Some(secs) = lookup("HAILMETER_REQUEST_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.backend.request_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring bad HAILMETER_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Some(secs) = lookup("HAILMETER_DRAIN_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.outbox.drain_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring bad HAILMETER_DRAIN_INTERVAL_SECS"),
            }
        }

        if let Some(path) = lookup("HAILMETER_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "hailmeter", "hailmeter")
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Configured database path, else the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join(DATABASE_FILE)))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn driver_id(&self) -> Option<&str> {
        self.driver.id.as_deref()
    }

    pub fn backend_url(&self) -> Option<&str> {
        self.backend.base_url.as_deref()
    }
}
