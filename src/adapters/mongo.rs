use futures::TryStreamExt;
use mongodb::Client;
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use std::pin::Pin;
use tracing::{info, warn};

use crate::config::DbConfig;
use crate::ports;
use crate::types::push::Subscription;
use crate::types::store::{FetchedSubscriptions, InvalidRecordPolicy, RecordError, StoreError};

#[derive(Debug, Clone)]
pub struct MongoSubscriptionStore {
    config: DbConfig,
    policy: InvalidRecordPolicy,
}

impl MongoSubscriptionStore {
    pub fn new(config: DbConfig, policy: InvalidRecordPolicy) -> Self {
        Self { config, policy }
    }

    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: self.config.host.clone(),
                port: Some(self.config.port),
            }])
            .build();
        options.server_selection_timeout = Some(self.config.connection_timeout());
        options.connect_timeout = Some(self.config.connection_timeout());
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        if let Some(username) = &self.config.username {
            let mut credential = Credential::builder().username(username.clone()).build();
            credential.password = self.config.password.clone();
            options.credential = Some(credential);
        }
        options
    }

    async fn fetch(&self) -> Result<FetchedSubscriptions, StoreError> {
        let client = Client::with_options(self.client_options())
            .map_err(|err| StoreError::Connection(Box::new(err)))?;
        let server_version = probe(&client).await?;
        info!(
            %server_version,
            host = %self.config.host,
            port = self.config.port,
            "connected to MongoDB"
        );

        let collection = client
            .database(&self.config.database)
            .collection::<Document>(&self.config.collection);
        let mut cursor = collection
            .find(doc! {})
            .await
            .map_err(|err| StoreError::Query(Box::new(err)))?;
        let mut documents = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|err| StoreError::Query(Box::new(err)))?
        {
            documents.push(document);
        }

        let (subscriptions, rejected) = validate_documents(documents, self.policy)?;
        Ok(FetchedSubscriptions {
            server_version,
            subscriptions,
            rejected,
        })
    }
}

impl ports::SubscriptionStore for MongoSubscriptionStore {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<FetchedSubscriptions, StoreError>> + Send + 'a>>
    where
        Self: 'a;

    fn fetch_all<'a>(&'a self) -> Self::Fut<'a> {
        Box::pin(self.fetch())
    }
}

/// Liveness probe. `buildInfo` needs no privileges and reports the version.
async fn probe(client: &Client) -> Result<String, StoreError> {
    let info = client
        .database("admin")
        .run_command(doc! { "buildInfo": 1 })
        .await
        .map_err(|err| StoreError::Connection(Box::new(err)))?;
    Ok(info.get_str("version").unwrap_or("unknown").to_string())
}

fn validate_documents(
    documents: Vec<Document>,
    policy: InvalidRecordPolicy,
) -> Result<(Vec<Subscription>, Vec<RecordError>), StoreError> {
    let mut subscriptions = Vec::with_capacity(documents.len());
    let mut rejected = Vec::new();
    for (index, document) in documents.into_iter().enumerate() {
        match parse_subscription(index + 1, document) {
            Ok(subscription) => subscriptions.push(subscription),
            Err(error) => match policy {
                InvalidRecordPolicy::Abort => return Err(StoreError::InvalidRecord(error)),
                InvalidRecordPolicy::Skip => {
                    warn!(%error, "skipping invalid subscription");
                    rejected.push(error);
                }
            },
        }
    }
    Ok((subscriptions, rejected))
}

/// `position` is 1-based, in collection order.
fn parse_subscription(position: usize, document: Document) -> Result<Subscription, RecordError> {
    let id = document.get("_id").map(|id| id.to_string());
    let reject = |reason: String| RecordError {
        position,
        id: id.clone(),
        reason,
    };

    let subscription: Subscription =
        mongodb::bson::from_document(document).map_err(|err| reject(err.to_string()))?;
    if subscription.endpoint.trim().is_empty() {
        return Err(reject("endpoint is empty".to_string()));
    }
    if let Err(err) = subscription.endpoint_url() {
        return Err(reject(err.to_string()));
    }
    if subscription.keys.p256dh.is_empty() || subscription.keys.auth.is_empty() {
        return Err(reject("encryption keys are empty".to_string()));
    }
    Ok(subscription)
}
