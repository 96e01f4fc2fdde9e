//! Sync configuration.
//!
//! Every field has a default matching the DiveLoggerESP32 firmware, so an
//! empty TOML document is a valid configuration:
//!
//! ```toml
//! device_name = "DiveLoggerESP32"
//! scan_timeout_ms = 8000
//! session_timeout_ms = 120000
//! terminal_index = 166
//! match_tolerance_secs = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_DEVICE_NAME: &str = "DiveLoggerESP32";
pub const DEFAULT_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
pub const DEFAULT_CHARACTERISTIC_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// The logger always sends 167 samples, indices 0..=166.
pub const DEFAULT_TERMINAL_INDEX: u32 = 166;
pub const DEFAULT_MATCH_TOLERANCE_SECS: u64 = 2;
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Advertised name of the logging device
    pub device_name: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    /// Upper bound on the scan phase and, separately, the connect phase
    pub scan_timeout_ms: u64,
    /// Upper bound on subscribing and receiving the whole log
    pub session_timeout_ms: u64,
    /// Index of the record that ends a session
    pub terminal_index: u32,
    pub match_tolerance_secs: u64,
    /// Longest unterminated line the reassembler will hold
    pub max_buffer_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_string(),
            scan_timeout_ms: 8_000,
            session_timeout_ms: 120_000,
            terminal_index: DEFAULT_TERMINAL_INDEX,
            match_tolerance_secs: DEFAULT_MATCH_TOLERANCE_SECS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::Invalid("device_name must not be empty".into()));
        }
        if self.scan_timeout_ms == 0 {
            return Err(ConfigError::Invalid("scan_timeout_ms must be > 0".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::Invalid("session_timeout_ms must be > 0".into()));
        }
        if self.max_buffer_bytes == 0 {
            return Err(ConfigError::Invalid("max_buffer_bytes must be > 0".into()));
        }
        for (name, uuid) in [
            ("service_uuid", &self.service_uuid),
            ("characteristic_uuid", &self.characteristic_uuid),
        ] {
            if uuid.len() < 8 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must have at least 8 characters"
                )));
            }
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}
