//! Settings structs, their defaults, and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Server connection settings.
    pub network: NetworkConfig,
    /// Prediction and event-processing settings.
    pub sync: SyncConfig,
    /// Network quality measurement settings.
    pub monitor: MonitorConfig,
    /// Logging settings.
    pub debug: DebugConfig,
}

/// Server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or IP.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// TCP handshake deadline in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_frame_bytes: u32,
    /// Outbound messages at least this large are LZ4-compressed.
    pub compression_threshold: usize,
    /// Reconnect attempts after a dropped link. 0 exits instead.
    pub reconnect_attempts: u32,
    /// Delay before the first reconnect attempt in milliseconds. Doubles per
    /// failed attempt.
    pub reconnect_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 3001,
            connect_timeout_ms: 10_000,
            max_frame_bytes: 4 * 1024 * 1024,
            compression_threshold: 512,
            reconnect_attempts: 10,
            reconnect_delay_ms: 500,
        }
    }
}

impl NetworkConfig {
    /// `host:port` string for connecting.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }

    /// Handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before the first reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Prediction and event-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Batched events applied per frame.
    pub chunk_size: usize,
    /// Frames per second driving the event queue.
    pub frame_rate: u32,
    /// Unconfirmed inputs kept before the oldest is evicted.
    pub max_pending_inputs: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            frame_rate: 60,
            max_pending_inputs: 256,
        }
    }
}

impl SyncConfig {
    /// Time between frames. A zero frame rate is treated as 1 Hz.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// Network quality measurement settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Latency probe period in milliseconds.
    pub probe_interval_ms: u64,
    /// Period for reporting metrics to the server, in milliseconds.
    pub report_interval_ms: u64,
    /// A probe unanswered for this long counts as lost.
    pub probe_timeout_ms: u64,
    /// Weight of a new sample in the moving averages (0.0 to 1.0).
    pub smoothing_alpha: f64,
    /// Probe outcomes remembered for the packet-loss estimate.
    pub loss_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            report_interval_ms: 10_000,
            probe_timeout_ms: 3_000,
            smoothing_alpha: 0.3,
            loss_window: 20,
        }
    }
}

impl MonitorConfig {
    /// Probe period.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Report period.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Probe loss deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Filter directive, e.g. `"info"` or `"info,vtt_sync=debug"`.
    pub log_level: String,
    /// Directory for the JSON log file. Empty disables file logging.
    pub log_dir: String,
    /// Write a JSON log file next to console output.
    pub json_log: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
            json_log: false,
        }
    }
}

/// `<platform config dir>/vtt-sync`, or `./vtt-sync` when the platform has
/// no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vtt-sync")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load `config.ron` from `config_dir`, writing defaults if it is missing.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);

        if path.exists() {
            let config = Self::read(&path)?;
            log::info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Write `config.ron` into `config_dir`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read `config.ron`. Returns `Some` only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &fresh == self {
            Ok(None)
        } else {
            log::info!("Config reloaded with changes");
            Ok(Some(fresh))
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.sync.chunk_size, 5);
        assert_eq!(config.sync.frame_rate, 60);
        assert_eq!(config.monitor.probe_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.report_interval(), Duration::from_secs(10));
        assert_eq!(config.monitor.smoothing_alpha, 0.3);
        assert_eq!(config.network.endpoint(), "127.0.0.1:3001");
        assert_eq!(config.network.reconnect_attempts, 10);
        assert_eq!(config.network.reconnect_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = ron::from_str("(network: (server_port: 4000))").unwrap();
        assert_eq!(config.network.server_port, 4000);
        assert_eq!(config.network.server_address, "127.0.0.1");
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let result: Result<Config, _> = ron::from_str("(render: (fov: 90), sync: ())");
        assert!(result.is_ok());
    }

    #[test]
    fn test_frame_interval() {
        let sync = SyncConfig {
            frame_rate: 50,
            ..Default::default()
        };
        assert!((sync.frame_interval().as_secs_f64() - 0.02).abs() < 1e-9);
        let stalled = SyncConfig {
            frame_rate: 0,
            ..Default::default()
        };
        assert_eq!(stalled.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("vtt");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join("config.ron").exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.server_address = "table.example.org".to_string();
        config.monitor.loss_window = 50;
        config.debug.json_log = true;

        config.save(dir.path()).unwrap();
        assert_eq!(Config::load_or_create(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_reload_reports_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut edited = config.clone();
        edited.sync.chunk_size = 10;
        edited.save(dir.path()).unwrap();
        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.sync.chunk_size, 10);
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "(network: [oops").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_default_dir_is_named() {
        assert!(default_config_dir().ends_with("vtt-sync"));
    }
}
