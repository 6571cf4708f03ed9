//! Durable store for publishes that failed terminally.
//!
//! A [`FailedMessage`] exists exactly while its publish is undelivered: the
//! async dispatch path creates it, the retry procedure deletes it after a
//! successful re-publish, and nothing else changes it.

pub mod file;
pub mod postgres;

pub use file::JsonFileStore;
pub use postgres::PostgresStore;

use crate::config::{DeadLetterConfig, StoreBackend};
use crate::kafka::PublishOptions;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Table holding failed messages in the postgres backend.
pub const TABLE_NAME: &str = "kafka_failed_messages";

/// A stored publish that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    /// Assigned by the store, increasing, never reused.
    pub id: i64,
    pub topic: String,
    /// Body as it would go on the wire. Structured payloads are stored as
    /// their canonical JSON text.
    pub payload: Vec<u8>,
    /// Whether `payload` is re-parsed as JSON before re-publishing.
    pub as_json: bool,
    pub options: Option<PublishOptions>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields of a [`FailedMessage`] supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFailedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub as_json: bool,
    pub options: Option<PublishOptions>,
    pub error_message: String,
}

impl NewFailedMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        as_json: bool,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            as_json,
            options: None,
            error_message: error_message.into(),
        }
    }

    /// Attaches publish options. Empty options are stored as absent.
    pub fn with_options(mut self, options: Option<PublishOptions>) -> Self {
        self.options = options.filter(|o| !o.is_empty());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::Store(
                "failed message must have a non-empty topic".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage backend for failed messages.
///
/// Every operation surfaces persistence failures; losing a dead letter is
/// worse than the publish failure that produced it.
#[trait_variant::make(Send)]
pub trait DeadLetterStore: Send + Sync {
    /// Persists a new record and returns it with its assigned id.
    async fn record(&self, message: NewFailedMessage) -> Result<FailedMessage>;

    /// All records, oldest first.
    async fn list_all(&self) -> Result<Vec<FailedMessage>>;

    /// Deletes a record. Removing an unknown id succeeds.
    async fn remove(&self, id: i64) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// The backend selected by [`DeadLetterConfig`].
pub enum ConfiguredStore {
    Postgres(PostgresStore),
    File(JsonFileStore),
}

impl ConfiguredStore {
    pub async fn open(config: &DeadLetterConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Postgres => {
                let url = config.url.as_deref().ok_or_else(|| {
                    Error::Config("dead_letter.url is required for the postgres backend".to_string())
                })?;
                let store = PostgresStore::connect(url).await?;
                info!(table = TABLE_NAME, "Using postgres dead-letter store");
                Ok(Self::Postgres(store))
            }
            StoreBackend::File => {
                info!(path = ?config.path, "Using file dead-letter store");
                Ok(Self::File(JsonFileStore::new(&config.path)))
            }
        }
    }

    /// Creates the backing table or file if missing.
    pub async fn migrate(&self) -> Result<()> {
        match self {
            Self::Postgres(store) => store.migrate().await,
            Self::File(store) => store.init().await,
        }
    }
}

impl DeadLetterStore for ConfiguredStore {
    async fn record(&self, message: NewFailedMessage) -> Result<FailedMessage> {
        match self {
            Self::Postgres(store) => store.record(message).await,
            Self::File(store) => store.record(message).await,
        }
    }

    async fn list_all(&self) -> Result<Vec<FailedMessage>> {
        match self {
            Self::Postgres(store) => store.list_all().await,
            Self::File(store) => store.list_all().await,
        }
    }

    async fn remove(&self, id: i64) -> Result<()> {
        match self {
            Self::Postgres(store) => store.remove(id).await,
            Self::File(store) => store.remove(id).await,
        }
    }

    async fn count(&self) -> Result<u64> {
        match self {
            Self::Postgres(store) => store.count().await,
            Self::File(store) => store.count().await,
        }
    }
}
