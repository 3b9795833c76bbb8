//! Form-encoded payloads and their newline-terminated record framing.
//!
//! A payload is the exact text sent to the collector and the exact text
//! stored in the pending queue:
//!
//! ```text
//! temperature=21.5&humidity=40.0
//! ```

use crate::error::{Error, Result};
use crate::reading::Reading;

/// Content type of the outbound delivery body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Record separator used in the pending queue store.
pub const RECORD_SEPARATOR: u8 = b'\n';

/// The serialized form of a [`Reading`]. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload(String);

impl Payload {
    /// Encode a reading with one decimal digit per value.
    pub fn encode(reading: &Reading) -> Self {
        Self(format!(
            "temperature={:.1}&humidity={:.1}",
            reading.temperature, reading.humidity
        ))
    }

    /// Wrap a record read back from the store. The text is kept verbatim so
    /// a resend is byte-identical to the original attempt.
    pub fn from_record(record: impl Into<String>) -> Self {
        Self(record.into())
    }

    /// Decode the payload back into a reading.
    pub fn decode(&self) -> Result<Reading> {
        let mut temperature = None;
        let mut humidity = None;

        for pair in self.0.split('&') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Payload(format!("missing '=' in '{}'", pair)))?;
            let value: f64 = value
                .parse()
                .map_err(|e| Error::Payload(format!("bad value for '{}': {}", key, e)))?;

            match key {
                "temperature" => temperature = Some(value),
                "humidity" => humidity = Some(value),
                other => return Err(Error::Payload(format!("unknown field '{}'", other))),
            }
        }

        match (temperature, humidity) {
            (Some(temperature), Some(humidity)) => Ok(Reading::new(temperature, humidity)),
            _ => Err(Error::Payload(format!("incomplete payload '{}'", self.0))),
        }
    }

    /// The payload text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The payload followed by the record separator.
    pub fn to_record(&self) -> String {
        let mut record = String::with_capacity(self.0.len() + 1);
        record.push_str(&self.0);
        record.push(RECORD_SEPARATOR as char);
        record
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split raw store content into its complete records, front to back.
///
/// Only newline-terminated lines count: a trailing line without a separator
/// is the remains of an interrupted append and is discarded. Blank lines are
/// skipped and a `\r` before the separator is tolerated.
pub fn split_records(content: &[u8]) -> Vec<Payload> {
    let Some(end) = content.iter().rposition(|&b| b == RECORD_SEPARATOR) else {
        return Vec::new();
    };

    content[..end]
        .split(|&b| b == RECORD_SEPARATOR)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| Payload::from_record(String::from_utf8_lossy(line)))
        .collect()
}

/// Whether the content ends in a record that was never terminated.
pub fn has_partial_record(content: &[u8]) -> bool {
    content.last().is_some_and(|&b| b != RECORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_one_decimal() {
        let payload = Payload::encode(&Reading::new(21.46, 40.0));
        assert_eq!(payload.as_str(), "temperature=21.5&humidity=40.0");
    }

    #[test]
    fn test_encode_negative() {
        let payload = Payload::encode(&Reading::new(-3.0, 8.24));
        assert_eq!(payload.as_str(), "temperature=-3.0&humidity=8.2");
    }

    #[test]
    fn test_decode_field_order_independent() {
        let payload = Payload::from_record("humidity=51.0&temperature=21.0");
        assert_eq!(payload.decode().unwrap(), Reading::new(21.0, 51.0));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Payload::from_record("temperature=abc&humidity=1.0").decode().is_err());
        assert!(Payload::from_record("temperature=1.0").decode().is_err());
        assert!(Payload::from_record("pressure=1013.0&humidity=1.0").decode().is_err());
        assert!(Payload::from_record("").decode().is_err());
    }

    #[test]
    fn test_to_record_appends_separator() {
        let payload = Payload::encode(&Reading::new(20.0, 50.0));
        assert_eq!(payload.to_record(), "temperature=20.0&humidity=50.0\n");
    }

    #[test]
    fn test_split_records_in_order() {
        let content = b"temperature=20.0&humidity=50.0\ntemperature=21.0&humidity=51.0\n";
        let records = split_records(content);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_str(), "temperature=20.0&humidity=50.0");
        assert_eq!(records[1].as_str(), "temperature=21.0&humidity=51.0");
    }

    #[test]
    fn test_split_records_discards_partial_tail() {
        let content = b"temperature=20.0&humidity=50.0\ntemperature=21.0&hum";
        let records = split_records(content);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_str(), "temperature=20.0&humidity=50.0");
        assert!(has_partial_record(content));
    }

    #[test]
    fn test_split_records_crlf_and_blank_lines() {
        let content = b"temperature=20.0&humidity=50.0\r\n\r\n\ntemperature=21.0&humidity=51.0\n";
        let records = split_records(content);

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].as_str(), "temperature=21.0&humidity=51.0");
    }

    #[test]
    fn test_split_records_empty() {
        assert!(split_records(b"").is_empty());
        assert!(split_records(b"no separator").is_empty());
        assert!(!has_partial_record(b""));
        assert!(!has_partial_record(b"a\n"));
    }
}
