use serde::{Deserialize, Serialize, Serializer};

/// A single temperature/humidity sample.
///
/// Only the latest reading is ever retained; it is overwritten on each
/// valid sample and never persisted as-is. Serializes with one decimal
/// digit per field, matching the precision of the delivered payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Degrees Celsius.
    #[serde(serialize_with = "one_decimal")]
    pub temperature: f64,

    /// Relative humidity in percent.
    #[serde(serialize_with = "one_decimal")]
    pub humidity: f64,
}

impl Reading {
    /// Create a new reading.
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// A reading is valid only if both components are finite.
    pub fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }

    /// This reading with both components rounded to one decimal digit.
    pub fn rounded(&self) -> Self {
        Self {
            temperature: round_one_decimal(self.temperature),
            humidity: round_one_decimal(self.humidity),
        }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Temp: {:.1}°C | Humidity: {:.1}%",
            self.temperature, self.humidity
        )
    }
}

/// Round through the same `{:.1}` rendering used for the delivered payload,
/// so exact ties resolve the same way in both places.
fn round_one_decimal(value: f64) -> f64 {
    format!("{:.1}", value).parse().unwrap_or(value)
}

fn one_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_one_decimal(*value))
}
