use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::config::DeliveryOptions;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscription {
    pub endpoint: String,
    #[serde(rename = "expirationTime", default)]
    pub expiration: Option<String>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid endpoint {endpoint:?}: {reason}")]
pub struct InvalidEndpoint {
    pub endpoint: String,
    pub reason: String,
}

impl Subscription {
    /// The endpoint as an absolute `http`/`https` URL with a host.
    pub fn endpoint_url(&self) -> Result<Url, InvalidEndpoint> {
        let invalid = |reason: String| InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }
}

/// What the caller asked to send, before the run timestamp is applied.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub title: String,
    pub message: String,
    pub options: DeliveryOptions,
}

/// The notification as it goes out to every subscription of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub options: DeliveryOptions,
}

/// A Web Push request ready for the wire: target, headers and encrypted body.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Rejected(u16),
    TransportFailed(String),
    EncodingFailed(String),
}

impl DeliveryStatus {
    pub fn from_http_status(status: u16) -> Self {
        if status == 201 {
            Self::Delivered
        } else {
            Self::Rejected(status)
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// 404 and 410 mean the push service no longer knows the subscription.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Rejected(404 | 410))
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => f.write_str("delivered"),
            Self::Rejected(status) if self.is_stale() => {
                write!(f, "rejected with status {status} (subscription is gone)")
            }
            Self::Rejected(status) => write!(f, "rejected with status {status}"),
            Self::TransportFailed(cause) => write!(f, "transport failed: {cause}"),
            Self::EncodingFailed(cause) => write!(f, "encoding failed: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub endpoint: String,
    pub status: DeliveryStatus,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub timestamp: String,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_delivered())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered()
    }
}
