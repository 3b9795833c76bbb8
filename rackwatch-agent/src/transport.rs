//! Collector uplink.
//!
//! A delivery attempt is judged only on whether the exchange completed: any
//! response code greater than zero counts as delivered, including HTTP error
//! statuses. Only a missing response (code <= 0) is a transport failure.

use std::future::Future;
use std::sync::Arc;

use rackwatch_common::{FORM_CONTENT_TYPE, Payload};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::config::CollectorConfig;
use crate::error::{AgentError, Result};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector answered. The status is not inspected further.
    Delivered { status: u16, body: String },
    /// No response was obtained.
    TransportFailure { reason: String },
}

impl DeliveryOutcome {
    /// Classify a raw response code, where zero or a negative value means
    /// no response was obtained.
    pub fn from_code(code: i32, body: impl Into<String>) -> Self {
        if code > 0 {
            Self::Delivered {
                status: u16::try_from(code).unwrap_or(u16::MAX),
                body: body.into(),
            }
        } else {
            Self::TransportFailure {
                reason: format!("no response (code {})", code),
            }
        }
    }

    /// Whether the attempt counts as delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// A way of getting one payload to the collector.
///
/// Calls are awaited to completion one at a time; implementations must
/// bound each attempt with their own timeout.
pub trait Transport: Send + Sync {
    /// Attempt to deliver `payload` once.
    fn deliver(&self, payload: &Payload) -> impl Future<Output = DeliveryOutcome> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn deliver(&self, payload: &Payload) -> impl Future<Output = DeliveryOutcome> + Send {
        (**self).deliver(payload)
    }
}

/// HTTP POST transport to the fixed collector URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport from the collector configuration.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AgentError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// The collector URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    async fn deliver(&self, payload: &Payload) -> DeliveryOutcome {
        debug!(url = %self.url, payload = %payload, "POST");

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(payload.as_str().to_owned())
            .send()
            .await;

        match response {
            Ok(response) => {
                let code = i32::from(response.status().as_u16());
                // The exchange already completed; a body read error only loses the log text.
                let body = response.text().await.unwrap_or_default();
                DeliveryOutcome::from_code(code, body)
            }
            Err(e) => DeliveryOutcome::TransportFailure {
                reason: e.to_string(),
            },
        }
    }
}
