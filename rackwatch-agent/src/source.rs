//! Reading sources.
//!
//! A source produces one temperature/humidity sample per poll or a failure.
//! Validation of the sample (finite components) is left to the caller.

use std::future::Future;
use std::path::{Path, PathBuf};

use rackwatch_common::Reading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::SensorConfig;

/// Sensor failure signal.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparseable value in {path}: {value:?}")]
    Parse { path: String, value: String },

    #[error("Sensor did not respond")]
    NoResponse,
}

/// Something that can be polled for a reading.
pub trait ReadingSource: Send {
    /// Take one sample.
    fn sample(&mut self) -> impl Future<Output = Result<Reading, SensorError>> + Send;
}

/// Linux IIO humidity/temperature device, as exposed by the dht11 driver.
///
/// Both attributes are reported in milli-units (milli-degrees Celsius and
/// milli-percent). The driver returns an I/O error when the sensor misses a
/// handshake, which surfaces as [`SensorError::Read`].
#[derive(Debug, Clone)]
pub struct IioSource {
    temperature: PathBuf,
    humidity: PathBuf,
}

impl IioSource {
    /// Create a source over an IIO device directory.
    pub fn new(device: impl AsRef<Path>) -> Self {
        let device = device.as_ref();
        Self {
            temperature: device.join("in_temp_input"),
            humidity: device.join("in_humidityrelative_input"),
        }
    }

    async fn read_milli(path: &Path) -> Result<f64, SensorError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SensorError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let value = raw.trim();
        value
            .parse::<i64>()
            .map(|milli| milli as f64 / 1000.0)
            .map_err(|_| SensorError::Parse {
                path: path.display().to_string(),
                value: value.to_string(),
            })
    }
}

impl ReadingSource for IioSource {
    async fn sample(&mut self) -> Result<Reading, SensorError> {
        let temperature = Self::read_milli(&self.temperature).await?;
        let humidity = Self::read_milli(&self.humidity).await?;
        Ok(Reading::new(temperature, humidity))
    }
}

/// Bounded random walk around a base reading.
#[derive(Debug)]
pub struct SimulatedSource {
    base: Reading,
    current: Reading,
    failure_rate: f64,
    rng: StdRng,
}

impl SimulatedSource {
    /// Maximum drift from the base value, per component.
    const SPAN: f64 = 5.0;

    /// Create a simulated source seeded from the OS.
    pub fn new(base: Reading, failure_rate: f64) -> Self {
        Self::with_rng(base, failure_rate, StdRng::from_os_rng())
    }

    /// Create a reproducible simulated source.
    pub fn with_seed(base: Reading, failure_rate: f64, seed: u64) -> Self {
        Self::with_rng(base, failure_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(base: Reading, failure_rate: f64, rng: StdRng) -> Self {
        Self {
            base,
            current: base,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    fn step(&mut self) -> Reading {
        let dt = self.rng.random_range(-0.3..=0.3);
        let dh = self.rng.random_range(-0.5..=0.5);

        self.current.temperature = (self.current.temperature + dt).clamp(
            self.base.temperature - Self::SPAN,
            self.base.temperature + Self::SPAN,
        );
        self.current.humidity = (self.current.humidity + dh)
            .clamp(self.base.humidity - Self::SPAN, self.base.humidity + Self::SPAN)
            .clamp(0.0, 100.0);

        self.current
    }
}

impl ReadingSource for SimulatedSource {
    async fn sample(&mut self) -> Result<Reading, SensorError> {
        if self.rng.random_bool(self.failure_rate) {
            return Err(SensorError::NoResponse);
        }
        Ok(self.step())
    }
}

/// The source selected by configuration.
#[derive(Debug)]
pub enum ConfiguredSource {
    Iio(IioSource),
    Simulated(SimulatedSource),
}

impl ConfiguredSource {
    /// Build the configured source.
    pub fn from_config(config: &SensorConfig) -> Self {
        match config {
            SensorConfig::Iio { device } => Self::Iio(IioSource::new(device)),
            SensorConfig::Simulated {
                temperature,
                humidity,
                failure_rate,
            } => Self::Simulated(SimulatedSource::new(
                Reading::new(*temperature, *humidity),
                *failure_rate,
            )),
        }
    }

    /// Short description for startup logging.
    pub fn describe(&self) -> String {
        match self {
            Self::Iio(source) => format!("iio ({})", source.temperature.display()),
            Self::Simulated(source) => format!("simulated (base {})", source.base),
        }
    }
}

impl ReadingSource for ConfiguredSource {
    async fn sample(&mut self) -> Result<Reading, SensorError> {
        match self {
            Self::Iio(source) => source.sample().await,
            Self::Simulated(source) => source.sample().await,
        }
    }
}
