//! Outbound message delivery for one-time and recovery codes.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::AuthError;

/// Delivers a text payload to a phone number or email address.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, destination: &str, payload: &str) -> Result<(), AuthError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Accepts every message and only logs the destination. Used when no real
/// transport is configured.
pub struct LogTransport {
    channel: &'static str,
}

impl LogTransport {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl MessageTransport for LogTransport {
    async fn send(&self, destination: &str, payload: &str) -> Result<(), AuthError> {
        info!(
            channel = self.channel,
            destination,
            len = payload.len(),
            "delivery disabled; message not sent"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every message in memory.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    /// `(destination, payload)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Payload of the most recent message to `destination`.
    pub fn last_to(&self, destination: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(d, _)| d == destination)
            .map(|(_, p)| p)
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(&self, destination: &str, payload: &str) -> Result<(), AuthError> {
        if self.fail {
            return Err(AuthError::Delivery("transport unavailable".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destination.to_string(), payload.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Twilio credentials.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// SMS delivery through the Twilio Messages REST API.
pub struct TwilioSmsTransport {
    http: reqwest::Client,
    config: TwilioConfig,
    base_url: String,
}

impl TwilioSmsTransport {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            base_url: "https://api.twilio.com".to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        )
    }
}

#[async_trait]
impl MessageTransport for TwilioSmsTransport {
    async fn send(&self, destination: &str, payload: &str) -> Result<(), AuthError> {
        debug!(destination, "sending SMS");
        let resp = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", destination),
                ("From", self.config.from_number.as_str()),
                ("Body", payload),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Delivery(format!("SMS request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "SMS provider rejected message");
            return Err(AuthError::Delivery(format!("SMS provider returned {status}: {body}")));
        }
        info!(destination, "SMS sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "twilio"
    }
}
