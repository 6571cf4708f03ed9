//! Synchronous publish with a bounded flush retry loop.
//!
//! A [`Publisher`] owns one client handle and is meant to be constructed
//! once by the host application and shared (it is cheap to clone). Every
//! publish enqueues the message, services delivery callbacks, then flushes
//! the outgoing queue, retrying the flush while the client reports that
//! messages are still pending.
//!
//! # Example
//!
//! ```rust,no_run
//! use kafka_courier::config::KafkaConfig;
//! use kafka_courier::kafka::{Publisher, PublishOptions};
//! use serde_json::json;
//!
//! # async fn example() -> kafka_courier::Result<()> {
//! let publisher = Publisher::connect(&KafkaConfig::default())?;
//!
//! publisher.publish("notification-events", "hello", None).await?;
//!
//! let options = PublishOptions::new().with_key("user-42");
//! publisher
//!     .publish_structured("notification-events", &json!({"type": "email"}), Some(options))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::KafkaConfig;
use crate::kafka::client::{OutgoingMessage, ProducerClient, RdKafkaClient};
use crate::kafka::encoding::to_canonical_json;
use crate::kafka::metadata::BrokerMetadata;
use crate::kafka::options::{DeliveryMode, PublishOptions};
use crate::{Error, Result};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Back-off between submissions while the local queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct Settings {
    default_topic: String,
    flush_timeout: Duration,
    max_flush_attempts: u32,
    metadata_timeout: Duration,
    ping_timeout: Duration,
}

impl From<&KafkaConfig> for Settings {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            default_topic: config.default_topic.clone(),
            flush_timeout: config.flush_timeout(),
            max_flush_attempts: config.max_flush_attempts,
            metadata_timeout: config.metadata_timeout(),
            ping_timeout: config.ping_timeout(),
        }
    }
}

pub struct Publisher<C: ProducerClient = RdKafkaClient> {
    client: Arc<C>,
    settings: Arc<Settings>,
    open: Arc<AtomicBool>,
}

impl<C: ProducerClient> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            settings: Arc::clone(&self.settings),
            open: Arc::clone(&self.open),
        }
    }
}

impl Publisher<RdKafkaClient> {
    /// Validates `config` and creates the librdkafka producer.
    ///
    /// Fails with [`Error::Config`] when the broker list is missing or
    /// malformed; no client is created in that case.
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        let client = RdKafkaClient::new(config)?;
        Self::with_client(client, config)
    }
}

impl<C: ProducerClient> Publisher<C> {
    pub fn with_client(client: C, config: &KafkaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: Arc::new(client),
            settings: Arc::new(Settings::from(config)),
            open: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn default_topic(&self) -> &str {
        &self.settings.default_topic
    }

    /// Publishes raw bytes and blocks until the outgoing queue is flushed.
    ///
    /// # Errors
    ///
    /// - [`Error::DeliveryRejected`] if the client refuses the message.
    /// - [`Error::FlushTimeout`] if every flush attempt left messages pending.
    /// - [`Error::Kafka`] if a flush fails for a reason other than a timeout.
    /// - [`Error::Closed`] after [`Publisher::close`].
    #[instrument(skip(self, payload, options), fields(bytes = payload.len()))]
    pub fn publish_blocking(
        &self,
        topic: &str,
        payload: &[u8],
        options: Option<&PublishOptions>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        if topic.is_empty() {
            return Err(Error::DeliveryRejected {
                topic: String::new(),
                source: KafkaError::MessageProduction(RDKafkaErrorCode::InvalidArgument),
            });
        }

        let message = OutgoingMessage {
            topic,
            payload,
            key: options.and_then(|o| o.key.as_deref()),
            headers: options.and_then(|o| o.headers.as_ref()),
            partition: options.and_then(|o| o.partition),
        };
        let mode = options.map(PublishOptions::delivery_mode).unwrap_or_default();

        self.submit(&message, mode)?;
        self.client.poll(Duration::ZERO);

        for attempt in 1..=self.settings.max_flush_attempts {
            match self.client.flush(self.settings.flush_timeout) {
                Ok(()) => {
                    debug!(attempt, "Message flushed");
                    return Ok(());
                }
                Err(e) if is_pending(&e) => {
                    warn!(
                        attempt,
                        max_attempts = self.settings.max_flush_attempts,
                        pending = self.client.queue_len(),
                        "Flush timed out with messages still pending"
                    );
                }
                Err(e) => return Err(Error::Kafka(e)),
            }
        }

        Err(Error::FlushTimeout {
            topic: topic.to_string(),
            attempts: self.settings.max_flush_attempts,
        })
    }

    /// Encodes `payload` as canonical JSON and publishes it.
    pub fn publish_structured_blocking<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: Option<&PublishOptions>,
    ) -> Result<()> {
        let encoded = to_canonical_json(payload)?;
        self.publish_blocking(topic, &encoded, options)
    }

    /// Runs [`Publisher::publish_blocking`] on the blocking thread pool.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        options: Option<PublishOptions>,
    ) -> Result<()> {
        let publisher = self.clone();
        let topic = topic.to_string();
        let payload = payload.into();

        tokio::task::spawn_blocking(move || {
            publisher.publish_blocking(&topic, &payload, options.as_ref())
        })
        .await?
    }

    /// Encodes on the calling task, then publishes like [`Publisher::publish`].
    pub async fn publish_structured<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: Option<PublishOptions>,
    ) -> Result<()> {
        let encoded = to_canonical_json(payload)?;
        self.publish(topic, encoded, options).await
    }

    pub async fn publish_to_default(
        &self,
        payload: impl Into<Vec<u8>>,
        options: Option<PublishOptions>,
    ) -> Result<()> {
        let topic = self.settings.default_topic.clone();
        self.publish(&topic, payload, options).await
    }

    pub async fn publish_structured_to_default<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        options: Option<PublishOptions>,
    ) -> Result<()> {
        let topic = self.settings.default_topic.clone();
        self.publish_structured(&topic, payload, options).await
    }

    /// `true` from construction until [`Publisher::close`]. Does not touch
    /// the network.
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Checks broker reachability with a short metadata request.
    ///
    /// Never fails: unexpected errors are logged and reported as `false`.
    /// Use [`Publisher::try_ping`] to see them.
    pub fn ping(&self) -> bool {
        match self.try_ping() {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!(error = %e, "Unexpected error while pinging brokers");
                false
            }
        }
    }

    /// Like [`Publisher::ping`], but only broker-unreachable conditions map
    /// to `Ok(false)`; any other failure is returned.
    pub fn try_ping(&self) -> Result<bool> {
        match self.client.fetch_metadata(self.settings.ping_timeout) {
            Ok(_) => Ok(true),
            Err(e) if is_unreachable(&e) => {
                debug!(error = %e, "Brokers unreachable");
                Ok(false)
            }
            Err(e) => Err(Error::Metadata(e)),
        }
    }

    pub fn metadata(&self) -> Result<BrokerMetadata> {
        self.client
            .fetch_metadata(self.settings.metadata_timeout)
            .map_err(Error::Metadata)
    }

    pub fn queue_len(&self) -> usize {
        self.client.queue_len()
    }

    /// Flushes outside of a publish. Returns whether the queue drained in
    /// time.
    pub fn flush(&self, timeout: Duration) -> bool {
        match self.client.flush(timeout) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, pending = self.client.queue_len(), "Manual flush incomplete");
                false
            }
        }
    }

    /// Drains the queue and stops accepting messages on every clone of this
    /// publisher. Returns whether the queue drained in time.
    pub fn close(&self, timeout: Duration) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return true;
        }
        let drained = self.flush(timeout);
        info!(drained, pending = self.client.queue_len(), "Publisher closed");
        drained
    }

    fn submit(&self, message: &OutgoingMessage<'_>, mode: DeliveryMode) -> Result<()> {
        let deadline = Instant::now() + self.settings.flush_timeout;

        loop {
            match self.client.produce(message) {
                Ok(()) => return Ok(()),
                Err(e)
                    if mode == DeliveryMode::Block
                        && is_queue_full(&e)
                        && Instant::now() < deadline =>
                {
                    debug!("Local queue full, waiting for space");
                    self.client.poll(QUEUE_FULL_BACKOFF);
                }
                Err(e) => {
                    return Err(Error::DeliveryRejected {
                        topic: message.topic.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

fn is_pending(error: &KafkaError) -> bool {
    error.rdkafka_error_code() == Some(RDKafkaErrorCode::OperationTimedOut)
}

fn is_queue_full(error: &KafkaError) -> bool {
    error.rdkafka_error_code() == Some(RDKafkaErrorCode::QueueFull)
}

fn is_unreachable(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerNotAvailable
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::Resolve
        )
    )
}
