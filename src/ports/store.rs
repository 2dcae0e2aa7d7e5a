use crate::types::store::{FetchedSubscriptions, StoreError};

pub trait SubscriptionStore: Send + Sync {
    type Fut<'a>: Future<Output = Result<FetchedSubscriptions, StoreError>> + Send + 'a
    where
        Self: 'a;

    /// Returns the full current snapshot. Must not query anything if the
    /// store cannot be reached.
    fn fetch_all<'a>(&'a self) -> Self::Fut<'a>;
}
