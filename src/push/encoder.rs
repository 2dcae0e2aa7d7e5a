use base64::Engine;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use thiserror::Error;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessageBuilder,
};

use crate::config::NotificationContent;
use crate::ports::PushEncoder;
use crate::push::vapid::{VapidCredentials, VapidKeyStatus};
use crate::types::push::{EncodedRequest, InvalidEndpoint, Notification, Subscription};

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error(transparent)]
    InvalidEndpoint(#[from] InvalidEndpoint),
    #[error("VAPID private key unavailable: {0}")]
    PrivateKeyUnavailable(String),
    #[error("failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("failed to sign VAPID claims: {0}")]
    Vapid(#[source] WebPushError),
    #[error("failed to encrypt message: {0}")]
    Message(#[source] WebPushError),
    #[error("encrypted payload missing from built message")]
    MissingPayload,
    #[error("invalid {name} header value {value:?}")]
    InvalidHeader { name: String, value: String },
}

#[derive(Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
    icon: &'a str,
    badge: &'a str,
    url: &'a str,
    #[serde(rename = "requireInteraction")]
    require_interaction: bool,
}

/// Encrypts payloads (RFC 8291, aes128gcm) and signs VAPID tokens (RFC 8292)
/// with the `web-push` crate. Every call uses fresh ephemeral keys and salt.
#[derive(Debug, Clone)]
pub struct WebPushEncoder {
    credentials: VapidCredentials,
    content: NotificationContent,
}

impl WebPushEncoder {
    pub fn new(credentials: VapidCredentials, content: NotificationContent) -> Self {
        Self {
            credentials,
            content,
        }
    }

    fn payload(&self, notification: &Notification) -> Result<Vec<u8>, EncodingError> {
        let payload = PushPayload {
            title: &notification.title,
            body: &notification.body,
            icon: &self.content.icon,
            badge: &self.content.badge,
            url: &self.content.url,
            require_interaction: notification.options.require_interaction,
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    fn sign(
        &self,
        subscription_info: &SubscriptionInfo,
        audience: String,
    ) -> Result<web_push::VapidSignature, EncodingError> {
        let pem = match &self.credentials.key {
            VapidKeyStatus::Ready(pem) => pem,
            VapidKeyStatus::Unavailable(cause) => {
                return Err(EncodingError::PrivateKeyUnavailable(cause.clone()));
            }
        };
        let mut signature_builder = VapidSignatureBuilder::from_pem(pem.as_slice(), subscription_info)
            .map_err(EncodingError::Vapid)?;
        signature_builder.add_claim("sub", self.credentials.claims.sub.as_str());
        signature_builder.add_claim("aud", audience);
        for (key, value) in &self.credentials.claims.extra {
            if key == "aud" {
                continue;
            }
            signature_builder.add_claim(key.as_str(), value.clone());
        }
        signature_builder.build().map_err(EncodingError::Vapid)
    }
}

impl PushEncoder for WebPushEncoder {
    fn encode(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> Result<EncodedRequest, EncodingError> {
        let payload = self.payload(notification)?;
        let endpoint = subscription.endpoint_url()?;
        // The audience is the endpoint origin, including a non-default port.
        let audience = endpoint.origin().ascii_serialization();
        let subscription_info = SubscriptionInfo::new(
            endpoint.as_str(),
            normalize_key(&subscription.keys.p256dh).as_str(),
            normalize_key(&subscription.keys.auth).as_str(),
        );
        let signature = self.sign(&subscription_info, audience)?;

        let mut builder = WebPushMessageBuilder::new(&subscription_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(notification.options.ttl);
        let message = builder.build().map_err(EncodingError::Message)?;
        let encrypted = message.payload.ok_or(EncodingError::MissingPayload)?;

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("ttl"), HeaderValue::from(message.ttl));
        headers.insert(
            HeaderName::from_static("urgency"),
            header_value("Urgency", &notification.options.urgency)?,
        );
        headers.insert(
            CONTENT_ENCODING,
            header_value("Content-Encoding", encrypted.content_encoding.to_str())?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        for (name, value) in &encrypted.crypto_headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| EncodingError::InvalidHeader {
                    name: name.to_string(),
                    value: value.clone(),
                })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        Ok(EncodedRequest {
            endpoint: subscription.endpoint.clone(),
            headers,
            body: encrypted.content,
        })
    }
}

/// Stored keys may be padded or use the standard alphabet; web-push only
/// accepts unpadded base64url.
fn normalize_key(key: &str) -> String {
    let key = key.trim();
    LENIENT_URL_SAFE
        .decode(key)
        .or_else(|_| LENIENT_STANDARD.decode(key))
        .map(|raw| URL_SAFE_NO_PAD.encode(raw))
        .unwrap_or_else(|_| key.to_string())
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, EncodingError> {
    HeaderValue::from_str(value).map_err(|_| EncodingError::InvalidHeader {
        name: name.to_string(),
        value: value.to_string(),
    })
}
