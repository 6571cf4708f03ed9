use super::{DeadLetterStore, FailedMessage, NewFailedMessage, TABLE_NAME};
use crate::kafka::PublishOptions;
use crate::{Error, Result};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};

const SELECT_COLUMNS: &str =
    "id, topic, payload, as_json, options, error_message, created_at, updated_at";

/// Dead-letter store backed by the `kafka_failed_messages` table.
///
/// Each operation is a single statement, so it is atomic on its own. Two
/// concurrent retry runs may both re-publish the same record; the second
/// delete is then a no-op.
pub struct PostgresStore {
    client: tokio_postgres::Client,
    connection_task: tokio::task::JoinHandle<()>,
}

impl PostgresStore {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        info!("Connecting to dead-letter database");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Dead-letter database connection error: {}", e);
            }
        });

        Ok(Self {
            client,
            connection_task,
        })
    }

    /// Creates the table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        let statement = format!(
            r#"
CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
    id BIGSERIAL PRIMARY KEY,
    topic VARCHAR(255) NOT NULL,
    payload BYTEA NOT NULL,
    as_json BOOLEAN NOT NULL,
    options JSONB,
    error_message TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#
        );

        self.client.batch_execute(&statement).await?;
        info!(table = TABLE_NAME, "Dead-letter table ready");
        Ok(())
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

impl DeadLetterStore for PostgresStore {
    async fn record(&self, message: NewFailedMessage) -> Result<FailedMessage> {
        message.validate()?;

        let options = message
            .options
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Error::Store(format!("cannot encode publish options: {}", e)))?;

        let query = format!(
            "INSERT INTO {TABLE_NAME} (topic, payload, as_json, options, error_message) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SELECT_COLUMNS}"
        );
        let row = self
            .client
            .query_one(
                &query,
                &[
                    &message.topic,
                    &message.payload,
                    &message.as_json,
                    &options,
                    &message.error_message,
                ],
            )
            .await?;

        let record = from_row(&row)?;
        debug!(id = record.id, topic = %record.topic, "Recorded failed message");
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<FailedMessage>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM {TABLE_NAME} ORDER BY id ASC");
        let rows = self.client.query(&query, &[]).await?;
        rows.iter().map(from_row).collect()
    }

    async fn remove(&self, id: i64) -> Result<()> {
        let query = format!("DELETE FROM {TABLE_NAME} WHERE id = $1");
        let deleted = self.client.execute(&query, &[&id]).await?;
        debug!(id, deleted, "Removed failed message");
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {TABLE_NAME}");
        let row = self.client.query_one(&query, &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

fn from_row(row: &Row) -> Result<FailedMessage> {
    let id: i64 = row.try_get("id")?;
    let options: Option<serde_json::Value> = row.try_get("options")?;
    let options = options
        .map(serde_json::from_value::<PublishOptions>)
        .transpose()
        .map_err(|e| Error::Store(format!("record {} has invalid options: {}", id, e)))?;

    Ok(FailedMessage {
        id,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        as_json: row.try_get("as_json")?,
        options,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
