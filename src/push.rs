mod dispatcher;
mod encoder;
#[cfg(test)]
mod fixtures;
pub(crate) mod vapid;

pub use dispatcher::{DEFAULT_CONCURRENCY, DEFAULT_SEND_TIMEOUT, DispatchLimits, Dispatcher};
pub use encoder::{EncodingError, WebPushEncoder};
pub use vapid::{
    GeneratedVapidKeys, KeygenError, VapidCredentials, VapidKeyStatus, generate_vapid_keys,
    load_vapid_key,
};

use tracing::info;

use crate::ports;
use crate::types::push::{DeliveryReport, NotificationRequest};
use crate::types::store::{RecordError, StoreError};

#[derive(Debug, Clone)]
pub struct RunReport {
    pub server_version: String,
    pub rejected: Vec<RecordError>,
    pub delivery: DeliveryReport,
}

/// One full run: fetch the snapshot, then dispatch to every subscription.
/// Nothing is encoded or sent when the store cannot be read.
pub async fn notify_all<St, T, E, S>(
    store: &St,
    dispatcher: &Dispatcher<T, E, S>,
    request: &NotificationRequest,
) -> Result<RunReport, StoreError>
where
    St: ports::SubscriptionStore,
    T: ports::TimeProvider,
    E: ports::PushEncoder,
    S: ports::PushSender,
{
    let fetched = store.fetch_all().await?;
    info!(
        subscriptions = fetched.subscriptions.len(),
        rejected = fetched.rejected.len(),
        "fetched subscriptions"
    );
    let delivery = dispatcher.dispatch(&fetched.subscriptions, request).await;
    Ok(RunReport {
        server_version: fetched.server_version,
        rejected: fetched.rejected,
        delivery,
    })
}
