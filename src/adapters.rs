mod mongo;

pub use mongo::MongoSubscriptionStore;

use std::pin::Pin;

use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::ports;
use crate::types::push::EncodedRequest;

#[derive(Debug, Clone, Copy)]
pub struct LocalTimeProvider {
    offset: UtcOffset,
}

impl LocalTimeProvider {
    /// Reads the local UTC offset once. Call this before the runtime starts:
    /// `time` refuses to look up the offset once the process has several
    /// threads, in which case UTC is used.
    pub fn detect() -> Self {
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

impl ports::TimeProvider for LocalTimeProvider {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[derive(Debug, Clone)]
pub struct HttpPushSender {
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ports::PushSender for HttpPushSender {
    type Error = reqwest::Error;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<u16, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn send<'a>(&'a self, request: EncodedRequest) -> Self::Fut<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(request.endpoint.as_str())
                .headers(request.headers)
                .body(request.body)
                .send()
                .await?;
            let status = response.status().as_u16();
            if status != 201 {
                let body = response.text().await.unwrap_or_default();
                debug!(endpoint = %request.endpoint, status, %body, "push service response");
            }
            Ok(status)
        })
    }
}
