//! Configuration for kaya-io
//!
//! Loads configuration from a TOML file with the parameters needed for
//! discovery, acquisition timing, and persistence.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub hardware: HardwareConfig,
    pub acquisition: AcquisitionConfig,
    pub emg: EmgConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Serial hardware configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// Walk all USB serial ports and classify by VID/PID
    pub auto_discover: bool,
    /// Ports to treat as wireless hubs regardless of USB identity
    #[serde(default)]
    pub dongle_ports: Vec<String>,
    /// Ports to treat as wired sensors regardless of USB identity
    #[serde(default)]
    pub wired_ports: Vec<String>,
    /// Baud rate for every sensor serial link
    pub baud_rate: u32,
}

/// Acquisition timing and robustness configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    /// Target per-sensor sample rate in Hz
    pub sampling_frequency: f64,
    /// Sliding-window capacity of each channel buffer, in samples
    pub buffer_capacity: usize,
    /// Consecutive invalid ticks on one link before the worker gives up
    pub error_escalation_ticks: u32,
    /// Per-iteration blocking read budget for stream workers, in milliseconds
    pub recv_timeout_ms: u64,
    /// Log an average throughput line every this many samples
    pub stats_every: u64,
}

/// EMG base station configuration (TCP)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmgConfig {
    /// Whether to look for an EMG base station at all
    pub enabled: bool,
    /// Base station host address
    pub host: String,
    /// Command channel port
    pub command_port: u16,
    /// EMG data channel port
    pub data_port: u16,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for per-session data directories
    pub data_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a lab acquisition rig
    pub fn lab_defaults() -> Self {
        Self {
            hardware: HardwareConfig {
                auto_discover: true,
                dongle_ports: Vec::new(),
                wired_ports: Vec::new(),
                baud_rate: 115_200,
            },
            acquisition: AcquisitionConfig {
                sampling_frequency: 100.0,
                buffer_capacity: 2500,
                error_escalation_ticks: 25,
                recv_timeout_ms: 500,
                stats_every: 1000,
            },
            emg: EmgConfig {
                enabled: false,
                host: "10.229.96.239".to_string(),
                command_port: 50040,
                data_port: 50043,
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }

    /// Streaming interval between samples, in microseconds
    pub fn interval_us(&self) -> u32 {
        (1_000_000.0 / self.acquisition.sampling_frequency) as u32
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::lab_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::lab_defaults();
        assert!(config.hardware.auto_discover);
        assert_eq!(config.hardware.baud_rate, 115_200);
        assert_eq!(config.acquisition.sampling_frequency, 100.0);
        assert_eq!(config.acquisition.error_escalation_ticks, 25);
        assert_eq!(config.emg.command_port, 50040);
        assert_eq!(config.interval_us(), 10_000);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::lab_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[hardware]"));
        assert!(toml_string.contains("[acquisition]"));
        assert!(toml_string.contains("[emg]"));
        assert!(toml_string.contains("[storage]"));
        assert!(toml_string.contains("[logging]"));

        let parsed: AppConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.acquisition.buffer_capacity, 2500);
        assert_eq!(parsed.emg.host, "10.229.96.239");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[hardware]
auto_discover = false
dongle_ports = ["/dev/ttyACM0"]
wired_ports = []
baud_rate = 115200

[acquisition]
sampling_frequency = 200.0
buffer_capacity = 5000
error_escalation_ticks = 50
recv_timeout_ms = 250
stats_every = 2000

[emg]
enabled = true
host = "127.0.0.1"
command_port = 50040
data_port = 50043

[storage]
data_dir = "/tmp/kaya"

[logging]
level = "debug"
output = "stdout"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(!config.hardware.auto_discover);
        assert_eq!(config.hardware.dongle_ports, vec!["/dev/ttyACM0"]);
        assert_eq!(config.acquisition.sampling_frequency, 200.0);
        assert_eq!(config.interval_us(), 5_000);
        assert!(config.emg.enabled);
        assert_eq!(config.storage.data_dir, "/tmp/kaya");
    }
}
