use crate::config::{NotificationContent, VapidClaims};
use crate::push::vapid::{VapidCredentials, VapidKeyStatus, generate_vapid_keys};
use crate::types::push::{Subscription, SubscriptionKeys};

pub(crate) fn test_content() -> NotificationContent {
    NotificationContent {
        icon: "https://app.example/icon.png".to_string(),
        badge: "https://app.example/badge.png".to_string(),
        url: "https://app.example/inbox".to_string(),
    }
}

pub(crate) fn test_credentials() -> VapidCredentials {
    let keys = generate_vapid_keys().expect("generate VAPID keys");
    VapidCredentials {
        key: VapidKeyStatus::Ready(keys.private_key_pem.into_bytes()),
        claims: VapidClaims {
            sub: "mailto:ops@example.com".to_string(),
            extra: serde_json::Map::new(),
        },
    }
}

/// A subscription with real P-256 client keys, as a browser would hand out.
pub(crate) fn browser_subscription(endpoint: &str) -> Subscription {
    let client_keys = generate_vapid_keys().expect("generate client keys");
    Subscription {
        endpoint: endpoint.to_string(),
        expiration: None,
        keys: SubscriptionKeys {
            p256dh: client_keys.public_key,
            auth: "AAAAAAAAAAAAAAAAAAAAAA".to_string(),
        },
    }
}
