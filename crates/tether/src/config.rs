//! Tether configuration
//!
//! Every tunable of the pipeline lives here as a named, documented option:
//! device selection, transport buffer sizing and timeouts, queue depth,
//! decode-error escalation, and the reconnect backoff. Loaded from a TOML
//! file with serde defaults so an empty file is a valid configuration.

use common::{Result, TetherError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::usb::accessory::AccessoryIdentity;
use crate::usb::profile::{ANDROID_VENDOR_IDS, DeviceProfile, UsbIdFilter};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TetherConfig {
    /// Device selection and accessory provisioning
    #[serde(default)]
    pub device: DeviceSettings,
    /// USB transfer tuning
    #[serde(default)]
    pub transport: TransportSettings,
    /// Queue and decoder tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Reconnection behavior
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Default log level when RUST_LOG is unset
    #[serde(default = "TetherConfig::default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Extra VID:PID filters to stream from, in addition to the built-in
    /// accessory-mode IDs (format "0x18d1:0x2d00", PID may be "*")
    #[serde(default)]
    pub id_filters: Vec<String>,
    /// VID:PID filters for devices eligible for the accessory-mode switch.
    /// Empty means any known Android handset vendor.
    #[serde(default)]
    pub candidate_filters: Vec<String>,
    /// Switch candidate phones into accessory mode automatically
    #[serde(default = "DeviceSettings::default_auto_convert")]
    pub auto_convert: bool,
    /// Identity strings sent during the accessory handshake
    #[serde(default)]
    pub accessory: AccessorySettings,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id_filters: Vec::new(),
            candidate_filters: Vec::new(),
            auto_convert: Self::default_auto_convert(),
            accessory: AccessorySettings::default(),
        }
    }
}

impl DeviceSettings {
    fn default_auto_convert() -> bool {
        true
    }

    /// Filters for devices already streaming-capable: built-in accessory
    /// profiles plus any configured extras
    pub fn stream_filters(&self) -> Result<Vec<UsbIdFilter>> {
        let mut filters: Vec<UsbIdFilter> =
            DeviceProfile::builtin().iter().map(|p| p.filter()).collect();
        for raw in &self.id_filters {
            filters.push(UsbIdFilter::parse(raw)?);
        }
        Ok(filters)
    }

    /// Filters for devices eligible for the accessory-mode switch
    pub fn conversion_filters(&self) -> Result<Vec<UsbIdFilter>> {
        if self.candidate_filters.is_empty() {
            return Ok(ANDROID_VENDOR_IDS
                .iter()
                .map(|&vendor_id| UsbIdFilter {
                    vendor_id,
                    product_id: None,
                })
                .collect());
        }
        self.candidate_filters
            .iter()
            .map(|raw| UsbIdFilter::parse(raw))
            .collect()
    }

    /// Identity strings for the accessory handshake
    pub fn accessory_identity(&self) -> AccessoryIdentity {
        AccessoryIdentity {
            manufacturer: self.accessory.manufacturer.clone(),
            model: self.accessory.model.clone(),
            description: self.accessory.description.clone(),
            version: self.accessory.version.clone(),
            uri: self.accessory.uri.clone(),
            serial: self.accessory.serial.clone(),
        }
    }
}

/// Identity strings presented to the phone during the accessory handshake.
/// The phone-side viewer app matches on manufacturer and model to decide
/// whether to start streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessorySettings {
    #[serde(default = "AccessorySettings::default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "AccessorySettings::default_model")]
    pub model: String,
    #[serde(default = "AccessorySettings::default_description")]
    pub description: String,
    #[serde(default = "AccessorySettings::default_version")]
    pub version: String,
    #[serde(default = "AccessorySettings::default_uri")]
    pub uri: String,
    #[serde(default = "AccessorySettings::default_serial")]
    pub serial: String,
}

impl Default for AccessorySettings {
    fn default() -> Self {
        Self {
            manufacturer: Self::default_manufacturer(),
            model: Self::default_model(),
            description: Self::default_description(),
            version: Self::default_version(),
            uri: Self::default_uri(),
            serial: Self::default_serial(),
        }
    }
}

impl AccessorySettings {
    fn default_manufacturer() -> String {
        "hmd-tether".to_string()
    }

    fn default_model() -> String {
        "StereoViewerLink".to_string()
    }

    fn default_description() -> String {
        "USB stereo viewer tether".to_string()
    }

    fn default_version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn default_uri() -> String {
        "https://github.com/hmd-tether/hmd-tether".to_string()
    }

    fn default_serial() -> String {
        "0001".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Size of each bulk-read buffer in bytes
    #[serde(default = "TransportSettings::default_read_buffer_len")]
    pub read_buffer_len: usize,
    /// Number of read buffers cycled through the transfer loop
    #[serde(default = "TransportSettings::default_read_buffer_count")]
    pub read_buffer_count: usize,
    /// Per-transfer bulk read timeout in milliseconds
    #[serde(default = "TransportSettings::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Declare the link dead after this long without data, in milliseconds
    #[serde(default = "TransportSettings::default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    /// Per-transfer control write timeout in milliseconds
    #[serde(default = "TransportSettings::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Retries for a failed control write before giving up on it
    #[serde(default = "TransportSettings::default_write_retries")]
    pub write_retries: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_buffer_len: Self::default_read_buffer_len(),
            read_buffer_count: Self::default_read_buffer_count(),
            read_timeout_ms: Self::default_read_timeout_ms(),
            stall_timeout_ms: Self::default_stall_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            write_retries: Self::default_write_retries(),
        }
    }
}

impl TransportSettings {
    fn default_read_buffer_len() -> usize {
        16 * 1024
    }

    fn default_read_buffer_count() -> usize {
        4
    }

    fn default_read_timeout_ms() -> u64 {
        100
    }

    fn default_stall_timeout_ms() -> u64 {
        500
    }

    fn default_write_timeout_ms() -> u64 {
        100
    }

    fn default_write_retries() -> u32 {
        2
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Compressed frames buffered between reader and decoder; the oldest
    /// is dropped when the decoder falls behind
    #[serde(default = "PipelineSettings::default_queue_depth")]
    pub queue_depth: usize,
    /// Rolling window for decode-error escalation, in seconds
    #[serde(default = "PipelineSettings::default_decode_error_window_secs")]
    pub decode_error_window_secs: u64,
    /// Decode errors within the window before a pipeline-level warning
    #[serde(default = "PipelineSettings::default_decode_error_threshold")]
    pub decode_error_threshold: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
            decode_error_window_secs: Self::default_decode_error_window_secs(),
            decode_error_threshold: Self::default_decode_error_threshold(),
        }
    }
}

impl PipelineSettings {
    fn default_queue_depth() -> usize {
        3
    }

    fn default_decode_error_window_secs() -> u64 {
        5
    }

    fn default_decode_error_threshold() -> usize {
        10
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Wait between reconnect attempts, in milliseconds
    #[serde(default = "ReconnectSettings::default_backoff_ms")]
    pub backoff_ms: u64,
    /// How long to wait for a driver binding to appear, in milliseconds
    #[serde(default = "ReconnectSettings::default_driver_wait_ms")]
    pub driver_wait_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            backoff_ms: Self::default_backoff_ms(),
            driver_wait_ms: Self::default_driver_wait_ms(),
        }
    }
}

impl ReconnectSettings {
    fn default_backoff_ms() -> u64 {
        1000
    }

    fn default_driver_wait_ms() -> u64 {
        10_000
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn driver_wait(&self) -> Duration {
        Duration::from_millis(self.driver_wait_ms)
    }
}

impl TetherConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from the given path, or from the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(TetherError::Config(format!(
                        "no configuration file found at {}",
                        default.display()
                    )));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            TetherError::Config(format!(
                "failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let config: TetherConfig = toml::from_str(&content).map_err(|e| {
            TetherError::Config(format!(
                "failed to parse config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;

        tracing::info!("loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the given path, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;

        tracing::info!("saved configuration to {}", path.display());
        Ok(())
    }

    /// Default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hmd-tether").join("tether.toml")
        } else {
            PathBuf::from(".config/hmd-tether/tether.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(TetherError::Config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        // Surface filter syntax errors at load time, not mid-reconnect
        self.device.stream_filters()?;
        self.device.conversion_filters()?;

        if self.pipeline.queue_depth == 0 {
            return Err(TetherError::Config(
                "pipeline.queue_depth must be at least 1".to_string(),
            ));
        }

        if self.transport.read_buffer_len < protocol::HEADER_LEN {
            return Err(TetherError::Config(format!(
                "transport.read_buffer_len must be at least {} bytes",
                protocol::HEADER_LEN
            )));
        }

        if self.transport.read_buffer_count == 0 {
            return Err(TetherError::Config(
                "transport.read_buffer_count must be at least 1".to_string(),
            ));
        }

        if self.transport.stall_timeout_ms < self.transport.read_timeout_ms {
            return Err(TetherError::Config(
                "transport.stall_timeout_ms must not be shorter than read_timeout_ms".to_string(),
            ));
        }

        Ok(())
    }
}
