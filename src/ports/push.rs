use crate::push::EncodingError;
use crate::types::push::{EncodedRequest, Notification, Subscription};

pub trait PushEncoder: Send + Sync + 'static {
    fn encode(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> Result<EncodedRequest, EncodingError>;
}

/// Sends one encoded request and resolves to the HTTP status of the response.
pub trait PushSender: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<u16, Self::Error>> + Send + 'a
    where
        Self: 'a;

    fn send<'a>(&'a self, request: EncodedRequest) -> Self::Fut<'a>;
}
