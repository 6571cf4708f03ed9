use crate::config::KafkaConfig;
use crate::kafka::metadata::BrokerMetadata;
use crate::{Error, Result};
use rdkafka::client::ClientContext;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A message ready for submission to the client's local queue.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub key: Option<&'a str>,
    pub headers: Option<&'a BTreeMap<String, String>>,
    pub partition: Option<i32>,
}

/// The primitives the publisher needs from a broker client.
///
/// Implementations must be safe to share between threads; the publisher
/// adds no locking of its own.
pub trait ProducerClient: Send + Sync + 'static {
    /// Enqueues a message locally. Errors mean the client refused it.
    fn produce(&self, message: &OutgoingMessage<'_>) -> KafkaResult<()>;

    /// Services delivery callbacks.
    fn poll(&self, timeout: Duration);

    /// Waits for the local queue to drain. A timeout error means messages
    /// are still pending.
    fn flush(&self, timeout: Duration) -> KafkaResult<()>;

    /// Messages queued or in flight and not yet acknowledged.
    fn queue_len(&self) -> usize;

    fn fetch_metadata(&self, timeout: Duration) -> KafkaResult<BrokerMetadata>;
}

/// Producer context that logs delivery reports.
#[derive(Debug, Default)]
pub struct DeliveryLogger {
    failed: AtomicU64,
}

impl DeliveryLogger {
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl ClientContext for DeliveryLogger {}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        match result {
            Ok(message) => debug!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Message delivered"
            ),
            Err((error, message)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    error = %error,
                    "Message delivery failed"
                );
            }
        }
    }
}

/// [`ProducerClient`] backed by librdkafka.
pub struct RdKafkaClient {
    producer: BaseProducer<DeliveryLogger>,
}

impl RdKafkaClient {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: BaseProducer<DeliveryLogger> = config
            .client_config()?
            .create_with_context(DeliveryLogger::default())
            .map_err(|e| match e {
                KafkaError::ClientConfig(..) => Error::Config(e.to_string()),
                e => Error::Kafka(e),
            })?;

        info!(brokers = %config.brokers, "Kafka producer created");
        Ok(Self { producer })
    }

    /// Deliveries reported as failed since the client was created.
    pub fn failed_deliveries(&self) -> u64 {
        self.producer.context().failed_count()
    }
}

impl ProducerClient for RdKafkaClient {
    fn produce(&self, message: &OutgoingMessage<'_>) -> KafkaResult<()> {
        let mut record = BaseRecord::<str, [u8]>::to(message.topic).payload(message.payload);

        if let Some(key) = message.key {
            record = record.key(key);
        }
        if let Some(partition) = message.partition {
            record = record.partition(partition);
        }
        if let Some(headers) = message.headers {
            let owned = headers.iter().fold(OwnedHeaders::new(), |acc, (name, value)| {
                acc.insert(Header {
                    key: name.as_str(),
                    value: Some(value.as_str()),
                })
            });
            record = record.headers(owned);
        }

        self.producer.send(record).map_err(|(e, _)| e)
    }

    fn poll(&self, timeout: Duration) {
        self.producer.poll(timeout);
    }

    fn flush(&self, timeout: Duration) -> KafkaResult<()> {
        self.producer.flush(timeout)
    }

    fn queue_len(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }

    fn fetch_metadata(&self, timeout: Duration) -> KafkaResult<BrokerMetadata> {
        let metadata = self.producer.client().fetch_metadata(None, timeout)?;
        Ok(BrokerMetadata::from(&metadata))
    }
}
