//! Configuration for the agent.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rackwatch_common::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Collector endpoint settings.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Pending queue store settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Tick loop settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Local control surface settings.
    #[serde(default)]
    pub control: ControlConfig,

    /// Reading source settings.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Fixed collector URL that receives every payload.
    #[serde(default = "default_collector_url")]
    pub url: String,

    /// Transport timeout for one delivery attempt in milliseconds (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_collector_url() -> String {
    "http://192.168.4.2/server-room/api.php".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: default_collector_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CollectorConfig {
    /// Transport timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How the store is truncated after a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Delete the store only once every record was resent; a failure keeps
    /// everything, including records already resent in that pass.
    #[default]
    WholeStore,
    /// On failure, rewrite the store to start at the failed record.
    Prefix,
}

/// Pending queue store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Path of the single store file.
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,

    /// Truncation mode (default: "whole_store").
    #[serde(default)]
    pub truncation: Truncation,
}

fn default_queue_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("rackwatch"))
        .unwrap_or_default()
        .join("failed_data.txt")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            truncation: Truncation::default(),
        }
    }
}

/// Tick loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed poll interval in milliseconds (default: 2000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u32,
}

fn default_interval_ms() -> u32 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

/// Control surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ControlConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            AgentError::validation(format!("Invalid listen address '{}': {}", self.listen, e))
        })
    }
}

/// Reading source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorConfig {
    /// Linux IIO humidity/temperature device (e.g. the dht11 driver).
    Iio {
        /// Device directory containing `in_temp_input` and `in_humidityrelative_input`.
        #[serde(default = "default_iio_device")]
        device: PathBuf,
    },
    /// Random walk around a base value, for running without hardware.
    Simulated {
        #[serde(default = "default_sim_temperature")]
        temperature: f64,
        #[serde(default = "default_sim_humidity")]
        humidity: f64,
        /// Probability that a poll reports a sensor failure.
        #[serde(default)]
        failure_rate: f64,
    },
}

fn default_iio_device() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

fn default_sim_temperature() -> f64 {
    22.0
}

fn default_sim_humidity() -> f64 {
    45.0
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::Iio {
            device: default_iio_device(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON5 file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(AgentError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_ms == 0 {
            return Err(AgentError::validation("scheduler.interval_ms must be > 0"));
        }

        if self.collector.timeout_ms == 0 {
            return Err(AgentError::validation("collector.timeout_ms must be > 0"));
        }

        if !self.collector.url.starts_with("http://") && !self.collector.url.starts_with("https://")
        {
            return Err(AgentError::validation(format!(
                "collector.url must be an http(s) URL, got '{}'",
                self.collector.url
            )));
        }

        if self.queue.path.as_os_str().is_empty() {
            return Err(AgentError::validation("queue.path must not be empty"));
        }

        self.control.listen_addr()?;

        if let SensorConfig::Simulated { failure_rate, .. } = self.sensor {
            if !(0.0..=1.0).contains(&failure_rate) {
                return Err(AgentError::validation(format!(
                    "sensor.failure_rate must be within [0, 1], got {}",
                    failure_rate
                )));
            }
        }

        Ok(())
    }
}
