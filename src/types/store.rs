use thiserror::Error;

use crate::types::push::Subscription;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What to do with a stored document that is not a valid subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidRecordPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedSubscriptions {
    pub server_version: String,
    pub subscriptions: Vec<Subscription>,
    pub rejected: Vec<RecordError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {position}{}: {reason}", id_suffix(.id))]
pub struct RecordError {
    pub position: usize,
    pub id: Option<String>,
    pub reason: String,
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" ({id})"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to the database: {0}")]
    Connection(#[source] BoxError),
    #[error("failed to read subscriptions: {0}")]
    Query(#[source] BoxError),
    #[error("invalid subscription {0}")]
    InvalidRecord(RecordError),
}
