//! Re-publishing of stored failed messages.
//!
//! [`retry_failed`] walks every record in the dead-letter store, oldest
//! first, and re-publishes it. A record is removed only after its publish
//! succeeded; a record that fails again stays for the next run and does not
//! stop the remaining records from being tried.

use crate::dead_letter::{DeadLetterStore, FailedMessage};
use crate::kafka::{ProducerClient, Publisher};
use crate::Result;
use serde::de::IgnoredAny;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Published and removed from the store.
    Delivered,
    /// Publish failed again; the record was kept.
    Failed { error: String },
    /// Published, but the record could not be removed and will be sent
    /// again by the next run.
    DeliveredButNotRemoved { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryResult {
    pub id: i64,
    pub topic: String,
    #[serde(flatten)]
    pub outcome: RetryOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    pub results: Vec<RetryResult>,
}

impl RetryReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn delivered(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !matches!(r.outcome, RetryOutcome::Failed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered()
    }
}

/// Retries every stored failed message once.
///
/// Only a failure to list the store aborts the run; per-record failures
/// are reported in the returned [`RetryReport`].
pub async fn retry_failed<C, S>(publisher: &Publisher<C>, store: &S) -> Result<RetryReport>
where
    C: ProducerClient,
    S: DeadLetterStore,
{
    let messages = store.list_all().await?;
    info!(count = messages.len(), "Retrying failed messages");

    let mut report = RetryReport::default();
    for message in messages {
        let outcome = match republish(publisher, &message).await {
            Ok(()) => match store.remove(message.id).await {
                Ok(()) => {
                    info!(id = message.id, topic = %message.topic, "Retried and removed message");
                    RetryOutcome::Delivered
                }
                Err(e) => {
                    error!(
                        id = message.id,
                        error = %e,
                        "Message re-published but could not be removed"
                    );
                    RetryOutcome::DeliveredButNotRemoved {
                        error: e.to_string(),
                    }
                }
            },
            Err(e) => {
                warn!(id = message.id, topic = %message.topic, error = %e, "Retry failed");
                RetryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        report.results.push(RetryResult {
            id: message.id,
            topic: message.topic,
            outcome,
        });
    }

    info!(
        attempted = report.attempted(),
        delivered = report.delivered(),
        failed = report.failed(),
        "Retry run complete"
    );
    Ok(report)
}

async fn republish<C: ProducerClient>(
    publisher: &Publisher<C>,
    message: &FailedMessage,
) -> Result<()> {
    // Stored structured payloads are already canonical; only check them.
    if message.as_json {
        serde_json::from_slice::<IgnoredAny>(&message.payload)?;
    }
    publisher
        .publish(&message.topic, message.payload.clone(), message.options.clone())
        .await
}
