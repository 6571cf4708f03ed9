//! Dead-letter store kept in a single JSON document.
//!
//! Writes go to a temporary file which is synced and renamed over the
//! previous document, so a crash never leaves a partially written store.
//! Access from one process is serialized by an async mutex; the file is not
//! safe to share between processes.

use super::{DeadLetterStore, FailedMessage, NewFailedMessage};
use crate::kafka::PublishOptions;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    /// Id assigned to the next record. Never decreases, so ids are not
    /// reused after removal.
    next_id: i64,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    id: i64,
    topic: String,
    /// Base64 of the raw payload.
    payload: String,
    as_json: bool,
    #[serde(default)]
    options: Option<PublishOptions>,
    error_message: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&FailedMessage> for StoredMessage {
    fn from(message: &FailedMessage) -> Self {
        Self {
            id: message.id,
            topic: message.topic.clone(),
            payload: STANDARD.encode(&message.payload),
            as_json: message.as_json,
            options: message.options.clone(),
            error_message: message.error_message.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

impl TryFrom<&StoredMessage> for FailedMessage {
    type Error = Error;

    fn try_from(stored: &StoredMessage) -> Result<Self> {
        let payload = STANDARD.decode(&stored.payload).map_err(|e| {
            Error::Store(format!("record {} has an undecodable payload: {}", stored.id, e))
        })?;

        Ok(Self {
            id: stored.id,
            topic: stored.topic.clone(),
            payload,
            as_json: stored.as_json,
            options: stored.options.clone(),
            error_message: stored.error_message.clone(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }
}

pub struct JsonFileStore {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Writes an empty document if the file does not exist yet.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        if fs::try_exists(&self.file_path).await? {
            debug!("Dead-letter file already exists at {:?}", self.file_path);
            return Ok(());
        }
        self.save(&Document {
            next_id: 1,
            messages: Vec::new(),
        })
        .await?;
        info!("Created dead-letter file at {:?}", self.file_path);
        Ok(())
    }

    async fn load(&self) -> Result<Document> {
        if !fs::try_exists(&self.file_path).await? {
            return Ok(Document {
                next_id: 1,
                messages: Vec::new(),
            });
        }

        let content = fs::read_to_string(&self.file_path).await?;
        serde_json::from_str::<Document>(&content).map_err(|e| {
            error!("Failed to parse dead-letter file: {}", e);
            Error::Store(format!("invalid dead-letter file {:?}: {}", self.file_path, e))
        })
    }

    async fn save(&self, document: &Document) -> Result<()> {
        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| Error::Store(format!("cannot encode dead-letter file: {}", e)))?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }
}

impl DeadLetterStore for JsonFileStore {
    async fn record(&self, message: NewFailedMessage) -> Result<FailedMessage> {
        message.validate()?;
        let _guard = self.lock.lock().await;

        let mut document = self.load().await?;
        let now = Utc::now();
        let record = FailedMessage {
            id: document.next_id.max(1),
            topic: message.topic,
            payload: message.payload,
            as_json: message.as_json,
            options: message.options,
            error_message: message.error_message,
            created_at: now,
            updated_at: now,
        };

        document.next_id = record.id + 1;
        document.messages.push(StoredMessage::from(&record));
        self.save(&document).await?;

        debug!(id = record.id, topic = %record.topic, "Recorded failed message");
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<FailedMessage>> {
        let _guard = self.lock.lock().await;
        let document = self.load().await?;

        let mut messages = document
            .messages
            .iter()
            .map(FailedMessage::try_from)
            .collect::<Result<Vec<_>>>()?;
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn remove(&self, id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;

        let before = document.messages.len();
        document.messages.retain(|m| m.id != id);
        if document.messages.len() == before {
            debug!(id, "Failed message already removed");
            return Ok(());
        }

        self.save(&document).await?;
        debug!(id, "Removed failed message");
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.messages.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));

        assert!(store.list_all().await.unwrap().is_empty());

        let first = store
            .record(NewFailedMessage::new("orders", "one", false, "flush timeout"))
            .await
            .unwrap();
        let second = store
            .record(
                NewFailedMessage::new("events", r#"{"a":1}"#, true, "rejected")
                    .with_options(Some(PublishOptions::new().with_key("k"))),
            )
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], first);
        assert_eq!(all[1].options.as_ref().unwrap().key.as_deref(), Some("k"));
        assert!(all[1].as_json);
    }

    #[tokio::test]
    async fn test_binary_payload_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dlq.json");
        let payload = vec![0u8, 159, 146, 150, 255];

        {
            let store = JsonFileStore::new(&path);
            store
                .record(NewFailedMessage::new("bin", payload.clone(), false, "err"))
                .await
                .unwrap();
        }

        let store = JsonFileStore::new(&path);
        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].payload, payload);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));

        let message = store
            .record(NewFailedMessage::new("orders", "one", false, "err"))
            .await
            .unwrap();

        store.remove(message.id).await.unwrap();
        store.remove(message.id).await.unwrap();
        store.remove(999).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_removal() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));

        let first = store
            .record(NewFailedMessage::new("orders", "one", false, "err"))
            .await
            .unwrap();
        store.remove(first.id).await.unwrap();
        let second = store
            .record(NewFailedMessage::new("orders", "two", false, "err"))
            .await
            .unwrap();

        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));

        let err = store
            .record(NewFailedMessage::new("", "one", false, "err"))
            .await
            .unwrap_err();
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dlq.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.list_all().await, Err(Error::Store(_))));
        assert!(store
            .record(NewFailedMessage::new("orders", "one", false, "err"))
            .await
            .unwrap_err()
            .is_store_error());
    }

    #[tokio::test]
    async fn test_unwritable_location_is_store_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("missing").join("dlq.json"));

        let err = store
            .record(NewFailedMessage::new("orders", "one", false, "err"))
            .await
            .unwrap_err();
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_init_creates_empty_document() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));

        store.init().await.unwrap();
        assert!(store.path().exists());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_init_keeps_existing_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("dlq.json"));
        store
            .record(NewFailedMessage::new("orders", "one", false, "err"))
            .await
            .unwrap();

        store.init().await.unwrap();

        let reopened = JsonFileStore::new(store.path());
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
