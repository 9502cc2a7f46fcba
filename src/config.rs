use anyhow::{Context, Result};
use dirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::DeviceId;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    /// Generated on first start and persisted afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos_dir: Option<PathBuf>,

    /// Bytes requested per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Retries per chunk after the first attempt before the whole task fails
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt N waits N units
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,

    #[serde(default = "default_size_tolerance")]
    pub size_tolerance_percent: f64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Pause between a natural completion and the next item
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_error_retry_delay")]
    pub error_retry_delay_secs: f64,

    /// Fraction of the duration that must be reached before a stop counts as completion
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_true")]
    pub start_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: f64,

    #[serde(default = "default_distance_threshold")]
    pub distance_threshold_m: f64,

    /// How long location ads survive without a fresh location-triggered push
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: f64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,

    /// `[longitude, latitude]` reported when no positioning hardware is wired in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_position: Option<[f64; 2]>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load from an explicit path, writing defaults back when the file is absent
    /// or incomplete (the device id is generated here on first start).
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded successfully");
            config
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        if config.device.id.is_none() {
            let id = DeviceId::generate();
            info!("Generated device id {}", id);
            config.device.id = Some(id.to_string());
            config.save_to(config_path)?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", config_path);
        Ok(())
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
            .id
            .clone()
            .map(DeviceId::new)
            .unwrap_or_else(DeviceId::generate)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("reel-signage").join("config.toml"))
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Upper bound for any delay read from the config file
const MAX_DELAY_SECS: f64 = 86_400.0;

/// TOML floats may be `inf` or `nan`; keep them in a range `Duration` accepts
fn secs_to_duration(secs: f64, min: f64) -> Duration {
    let secs = if secs.is_nan() {
        min
    } else {
        secs.clamp(min, MAX_DELAY_SECS)
    };
    Duration::from_secs_f64(secs)
}

impl DownloadConfig {
    /// Get the videos directory, using the platform data dir if not set
    pub fn videos_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.videos_dir {
            return Ok(dir.clone());
        }

        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("reel-signage").join("videos"))
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        secs_to_duration(self.retry_backoff_secs * attempt as f64, 0.0)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PlaybackConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        secs_to_duration(self.error_retry_delay_secs, 0.0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl LocationConfig {
    pub fn sample_interval(&self) -> Duration {
        secs_to_duration(self.sample_interval_secs, 0.001)
    }

    pub fn liveness_window(&self) -> Duration {
        secs_to_duration(self.liveness_window_secs, 0.0)
    }

    pub fn sweep_interval(&self) -> Duration {
        secs_to_duration(self.sweep_interval_secs, 0.001)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            api_base_url: default_api_base_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            videos_dir: None,
            chunk_size: default_chunk_size(),
            max_retries: default_retries(),
            retry_backoff_secs: default_retry_backoff(),
            size_tolerance_percent: default_size_tolerance(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            error_retry_delay_secs: default_error_retry_delay(),
            completion_threshold: default_completion_threshold(),
            poll_interval_ms: default_poll_interval(),
            start_enabled: default_true(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval(),
            distance_threshold_m: default_distance_threshold(),
            liveness_window_secs: default_liveness_window(),
            sweep_interval_secs: default_sweep_interval(),
            fixed_position: None,
        }
    }
}

// Default value functions
fn default_socket_url() -> String { "ws://localhost:3000/device".to_string() }
fn default_api_base_url() -> String { "http://localhost:3000/api".to_string() }
fn default_heartbeat_interval() -> u64 { 30 }
fn default_reconnect_delay() -> u64 { 5 }
fn default_chunk_size() -> u64 { 1024 * 1024 }
fn default_retries() -> u32 { 3 }
fn default_retry_backoff() -> f64 { 1.0 }
fn default_size_tolerance() -> f64 { 1.0 }
fn default_request_timeout() -> u64 { 60 }
fn default_settle_delay() -> u64 { 500 }
fn default_error_retry_delay() -> f64 { 3.0 }
fn default_completion_threshold() -> f64 { 0.9 }
fn default_poll_interval() -> u64 { 250 }
fn default_true() -> bool { true }
fn default_sample_interval() -> f64 { 30.0 }
fn default_distance_threshold() -> f64 { 50.0 }
fn default_liveness_window() -> f64 { 30.0 }
fn default_sweep_interval() -> f64 { 10.0 }
