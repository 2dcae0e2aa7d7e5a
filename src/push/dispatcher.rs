use futures::stream::{self, StreamExt};
use std::num::NonZeroUsize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::ports;
use crate::types::push::{
    DeliveryOutcome, DeliveryReport, DeliveryStatus, EncodedRequest, Notification,
    NotificationRequest, Subscription,
};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    pub concurrency: NonZeroUsize,
    pub send_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            concurrency: NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Runs encode, send and classification for every subscription of one run.
///
/// At most `limits.concurrency` deliveries are in flight at once. Outcomes
/// come back in subscription order, and the report is only produced once
/// every delivery has finished or timed out.
#[derive(Debug, Clone)]
pub struct Dispatcher<T, E, S> {
    time: T,
    encoder: E,
    sender: S,
    limits: DispatchLimits,
}

impl<T, E, S> Dispatcher<T, E, S>
where
    T: ports::TimeProvider,
    E: ports::PushEncoder,
    S: ports::PushSender,
{
    pub fn new(time: T, encoder: E, sender: S, limits: DispatchLimits) -> Self {
        Self {
            time,
            encoder,
            sender,
            limits,
        }
    }

    pub async fn dispatch(
        &self,
        subscriptions: &[Subscription],
        request: &NotificationRequest,
    ) -> DeliveryReport {
        let timestamp = display_time(self.time.now());
        let notification = Notification {
            title: request.title.clone(),
            body: compose_body(&timestamp, request),
            options: request.options.clone(),
        };

        let outcomes: Vec<DeliveryOutcome> = stream::iter(subscriptions)
            .map(|subscription| self.deliver(subscription, &notification))
            .buffered(self.limits.concurrency.get())
            .collect()
            .await;

        DeliveryReport {
            timestamp,
            outcomes,
        }
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> DeliveryOutcome {
        let status = match self.encoder.encode(subscription, notification) {
            Ok(request) => self.send(request).await,
            Err(err) => DeliveryStatus::EncodingFailed(err.to_string()),
        };

        if status.is_delivered() {
            info!(endpoint = %subscription.endpoint, "push notification delivered");
        } else {
            warn!(endpoint = %subscription.endpoint, %status, "push notification failed");
        }

        DeliveryOutcome {
            endpoint: subscription.endpoint.clone(),
            status,
        }
    }

    async fn send(&self, request: EncodedRequest) -> DeliveryStatus {
        debug!(endpoint = %request.endpoint, bytes = request.body.len(), "sending push request");
        match tokio::time::timeout(self.limits.send_timeout, self.sender.send(request)).await {
            Ok(Ok(status)) => DeliveryStatus::from_http_status(status),
            Ok(Err(err)) => DeliveryStatus::TransportFailed(err.to_string()),
            Err(_) => DeliveryStatus::TransportFailed(format!(
                "no response within {:?}",
                self.limits.send_timeout
            )),
        }
    }
}

fn display_time(now: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second())
}

fn compose_body(timestamp: &str, request: &NotificationRequest) -> String {
    format!(
        "{timestamp}\n{}\nUrgency: {}",
        request.message, request.options.urgency
    )
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::config::DeliveryOptions;
    use crate::push::fixtures::{browser_subscription, test_content, test_credentials};
    use crate::push::vapid::VapidKeyStatus;
    use crate::push::{EncodingError, WebPushEncoder};
    use crate::types::push::SubscriptionKeys;
    use reqwest::header::HeaderMap;
    use std::collections::{HashMap, HashSet};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct TestTime {
        now: OffsetDateTime,
        calls: Arc<AtomicUsize>,
    }

    impl TestTime {
        fn new() -> Self {
            Self {
                // 2025-01-12T09:30:05Z
                now: OffsetDateTime::from_unix_timestamp(1_736_674_205).expect("timestamp"),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ports::TimeProvider for TestTime {
        fn now(&self) -> OffsetDateTime {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.now
        }
    }

    #[derive(Clone, Default)]
    struct TestEncoder {
        failing: HashSet<String>,
        seen: Arc<Mutex<Vec<(String, Notification)>>>,
    }

    impl ports::PushEncoder for TestEncoder {
        fn encode(
            &self,
            subscription: &Subscription,
            notification: &Notification,
        ) -> Result<EncodedRequest, EncodingError> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((subscription.endpoint.clone(), notification.clone()));
            if self.failing.contains(&subscription.endpoint) {
                return Err(EncodingError::PrivateKeyUnavailable(
                    "bad key".to_string(),
                ));
            }
            Ok(EncodedRequest {
                endpoint: subscription.endpoint.clone(),
                headers: HeaderMap::new(),
                body: notification.body.clone().into_bytes(),
            })
        }
    }

    #[derive(Debug)]
    struct TestSendError;

    impl std::fmt::Display for TestSendError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("connection refused")
        }
    }

    #[derive(Clone, Default)]
    struct TestSender {
        statuses: HashMap<String, u16>,
        broken: HashSet<String>,
        hanging: HashSet<String>,
        delay: Option<Duration>,
        sent: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl TestSender {
        fn with_statuses(statuses: &[(&str, u16)]) -> Self {
            Self {
                statuses: statuses
                    .iter()
                    .map(|(endpoint, status)| (endpoint.to_string(), *status))
                    .collect(),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    impl ports::PushSender for TestSender {
        type Error = TestSendError;
        type Fut<'a>
            = Pin<Box<dyn Future<Output = Result<u16, Self::Error>> + Send + 'a>>
        where
            Self: 'a;

        fn send<'a>(&'a self, request: EncodedRequest) -> Self::Fut<'a> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .expect("sent lock")
                    .push(request.endpoint.clone());
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(current, Ordering::SeqCst);
                if self.hanging.contains(&request.endpoint) {
                    std::future::pending::<()>().await;
                }
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if self.broken.contains(&request.endpoint) {
                    return Err(TestSendError);
                }
                Ok(self.statuses.get(&request.endpoint).copied().unwrap_or(201))
            })
        }
    }

    fn subscription(endpoint: &str) -> Subscription {
        Subscription {
            endpoint: endpoint.to_string(),
            expiration: None,
            keys: SubscriptionKeys {
                p256dh: "p256".to_string(),
                auth: "auth".to_string(),
            },
        }
    }

    fn request() -> NotificationRequest {
        NotificationRequest {
            title: "Test".to_string(),
            message: "Hello".to_string(),
            options: DeliveryOptions {
                ttl: 60,
                urgency: "high".to_string(),
                require_interaction: false,
            },
        }
    }

    fn dispatcher<E: ports::PushEncoder>(
        encoder: E,
        sender: TestSender,
    ) -> Dispatcher<TestTime, E, TestSender> {
        Dispatcher::new(TestTime::new(), encoder, sender, DispatchLimits::default())
    }

    #[test]
    fn compose_body__should_prefix_time_and_append_urgency() {
        assert_eq!(
            compose_body("09:30:05", &request()),
            "09:30:05\nHello\nUrgency: high"
        );
    }

    #[test]
    fn display_time__should_pad_components() {
        let now = OffsetDateTime::from_unix_timestamp(3_661).expect("timestamp");

        assert_eq!(display_time(now), "01:01:01");
    }

    #[tokio::test]
    async fn dispatch__should_report_nothing_for_empty_store() {
        // Given
        let sender = TestSender::default();
        let dispatcher = dispatcher(TestEncoder::default(), sender.clone());

        // When
        let report = dispatcher.dispatch(&[], &request()).await;

        // Then
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.delivered(), 0);
        assert_eq!(report.failed(), 0);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatch__should_deliver_to_every_subscription() {
        // Given
        let sender = TestSender::default();
        let dispatcher = dispatcher(TestEncoder::default(), sender.clone());
        let subscriptions = vec![
            subscription("https://push.example/1"),
            subscription("https://push.example/2"),
            subscription("https://push.example/3"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.delivered(), 3);
        assert_eq!(report.failed(), 0);
        assert_eq!(sender.sent().len(), 3);
    }

    #[tokio::test]
    async fn dispatch__should_keep_rejected_status() {
        // Given
        let sender = TestSender::with_statuses(&[("https://push.example/gone", 410)]);
        let dispatcher = dispatcher(TestEncoder::default(), sender);
        let subscriptions = vec![
            subscription("https://push.example/gone"),
            subscription("https://push.example/ok"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].endpoint, "https://push.example/gone");
        assert_eq!(report.outcomes[0].status, DeliveryStatus::Rejected(410));
        assert_eq!(report.outcomes[1].status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn dispatch__should_isolate_failing_subscriptions() {
        // Given
        let encoder = TestEncoder {
            failing: HashSet::from(["https://push.example/bad-keys".to_string()]),
            ..TestEncoder::default()
        };
        let sender = TestSender {
            broken: HashSet::from(["https://push.example/unreachable".to_string()]),
            ..TestSender::default()
        };
        let dispatcher = dispatcher(encoder, sender.clone());
        let subscriptions = vec![
            subscription("https://push.example/bad-keys"),
            subscription("https://push.example/unreachable"),
            subscription("https://push.example/ok"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.attempted(), 3);
        assert_eq!(
            report.outcomes[0].status,
            DeliveryStatus::EncodingFailed("VAPID private key unavailable: bad key".to_string())
        );
        assert_eq!(
            report.outcomes[1].status,
            DeliveryStatus::TransportFailed("connection refused".to_string())
        );
        assert_eq!(report.outcomes[2].status, DeliveryStatus::Delivered);
        assert_eq!(
            sender.sent(),
            vec![
                "https://push.example/unreachable".to_string(),
                "https://push.example/ok".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn dispatch__should_send_identical_notification_with_shared_timestamp() {
        // Given
        let encoder = TestEncoder::default();
        let time = TestTime::new();
        let dispatcher = Dispatcher::new(
            time.clone(),
            encoder.clone(),
            TestSender::default(),
            DispatchLimits::default(),
        );
        let subscriptions = vec![
            subscription("https://push.example/1"),
            subscription("https://push.example/2"),
            subscription("https://push.example/3"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.timestamp, "09:30:05");
        assert_eq!(time.calls.load(Ordering::SeqCst), 1);
        let seen = encoder.seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 3);
        for (_, notification) in seen.iter() {
            assert_eq!(notification.title, "Test");
            assert_eq!(notification.body, "09:30:05\nHello\nUrgency: high");
            assert_eq!(notification, &seen[0].1);
        }
    }

    #[tokio::test]
    async fn dispatch__should_time_out_unresponsive_push_service() {
        // Given
        let sender = TestSender {
            hanging: HashSet::from(["https://push.example/stalled".to_string()]),
            ..TestSender::default()
        };
        let limits = DispatchLimits {
            send_timeout: Duration::from_millis(50),
            ..DispatchLimits::default()
        };
        let dispatcher = Dispatcher::new(TestTime::new(), TestEncoder::default(), sender, limits);
        let subscriptions = vec![
            subscription("https://push.example/stalled"),
            subscription("https://push.example/ok"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert!(matches!(
            report.outcomes[0].status,
            DeliveryStatus::TransportFailed(_)
        ));
        assert_eq!(report.outcomes[1].status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn dispatch__should_bound_requests_in_flight() {
        // Given
        let sender = TestSender {
            delay: Some(Duration::from_millis(20)),
            ..TestSender::default()
        };
        let limits = DispatchLimits {
            concurrency: NonZeroUsize::new(2).expect("non-zero"),
            ..DispatchLimits::default()
        };
        let dispatcher =
            Dispatcher::new(TestTime::new(), TestEncoder::default(), sender.clone(), limits);
        let subscriptions: Vec<_> = (0..6)
            .map(|index| subscription(&format!("https://push.example/{index}")))
            .collect();

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.delivered(), 6);
        assert_eq!(sender.max_in_flight.load(Ordering::SeqCst), 2);
        let endpoints: Vec<_> = report.outcomes.iter().map(|o| o.endpoint.clone()).collect();
        let expected: Vec<_> = subscriptions.iter().map(|s| s.endpoint.clone()).collect();
        assert_eq!(endpoints, expected);
    }

    #[tokio::test]
    async fn dispatch__should_fail_every_encoding_without_private_key() {
        // Given
        let mut credentials = test_credentials();
        credentials.key = VapidKeyStatus::Unavailable("cannot read private key".to_string());
        let encoder = WebPushEncoder::new(credentials, test_content());
        let sender = TestSender::default();
        let dispatcher = dispatcher(encoder, sender.clone());
        let subscriptions = vec![
            browser_subscription("https://push.example/1"),
            browser_subscription("https://push.example/2"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.delivered(), 0);
        assert_eq!(report.failed(), 2);
        for outcome in &report.outcomes {
            assert_eq!(
                outcome.status,
                DeliveryStatus::EncodingFailed(
                    "VAPID private key unavailable: cannot read private key".to_string()
                )
            );
        }
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatch__should_isolate_endpoints_that_are_not_absolute_urls() {
        // Given
        let encoder = WebPushEncoder::new(test_credentials(), test_content());
        let sender = TestSender::default();
        let dispatcher = dispatcher(encoder, sender.clone());
        let subscriptions = vec![
            browser_subscription("/push/abc"),
            browser_subscription("push.example.com:443"),
            browser_subscription("https://push.example/ok"),
        ];

        // When
        let report = dispatcher.dispatch(&subscriptions, &request()).await;

        // Then
        assert_eq!(report.attempted(), 3);
        assert!(matches!(
            &report.outcomes[0].status,
            DeliveryStatus::EncodingFailed(cause) if cause.contains("invalid endpoint")
        ));
        assert!(matches!(
            &report.outcomes[1].status,
            DeliveryStatus::EncodingFailed(cause) if cause.contains("invalid endpoint")
        ));
        assert_eq!(report.outcomes[2].status, DeliveryStatus::Delivered);
        assert_eq!(sender.sent(), vec!["https://push.example/ok".to_string()]);
    }
}
