use crate::kafka::client::{OutgoingMessage, ProducerClient};
use crate::kafka::metadata::{BrokerInfo, BrokerMetadata, TopicInfo};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A message captured by [`ScriptedClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub key: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub partition: Option<i32>,
}

/// In-process [`ProducerClient`] with scripted broker behaviour.
///
/// Produced messages sit in a local queue until a flush succeeds. Flushes
/// report "pending" for as many calls as configured.
pub struct ScriptedClient {
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    queued: Vec<SentMessage>,
    delivered: Vec<SentMessage>,
    pending_flushes: u32,
    never_drain: bool,
    flush_calls: u32,
    queue_full_submissions: u32,
    rejected_topics: HashSet<String>,
    rejected_payloads: HashSet<Vec<u8>>,
    metadata_error: Option<RDKafkaErrorCode>,
    metadata: BrokerMetadata,
}

impl ScriptedClient {
    pub fn new() -> Self {
        let metadata = BrokerMetadata {
            brokers: vec![BrokerInfo {
                id: 1,
                host: "localhost".to_string(),
                port: 9092,
            }],
            topics: vec![TopicInfo {
                name: "notification-events".to_string(),
                partitions: 1,
                error: None,
            }],
        };

        Self {
            state: Mutex::new(ScriptState {
                metadata,
                ..ScriptState::default()
            }),
        }
    }

    /// The next `count` flushes report messages still pending.
    pub fn with_pending_flushes(self, count: u32) -> Self {
        self.lock().pending_flushes = count;
        self
    }

    /// Every flush reports messages still pending.
    pub fn never_drain(self) -> Self {
        self.lock().never_drain = true;
        self
    }

    /// The next `count` submissions fail with a full local queue.
    pub fn with_queue_full(self, count: u32) -> Self {
        self.lock().queue_full_submissions = count;
        self
    }

    pub fn reject_topic(self, topic: &str) -> Self {
        self.lock().rejected_topics.insert(topic.to_string());
        self
    }

    pub fn reject_payload(self, payload: &[u8]) -> Self {
        self.lock().rejected_payloads.insert(payload.to_vec());
        self
    }

    /// Metadata requests fail with `code`.
    pub fn with_metadata_error(self, code: RDKafkaErrorCode) -> Self {
        self.lock().metadata_error = Some(code);
        self
    }

    pub fn with_metadata(self, metadata: BrokerMetadata) -> Self {
        self.lock().metadata = metadata;
        self
    }

    pub fn flush_calls(&self) -> u32 {
        self.lock().flush_calls
    }

    pub fn delivered(&self) -> Vec<SentMessage> {
        self.lock().delivered.clone()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().metadata_error = if reachable {
            None
        } else {
            Some(RDKafkaErrorCode::BrokerTransportFailure)
        };
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerClient for ScriptedClient {
    fn produce(&self, message: &OutgoingMessage<'_>) -> KafkaResult<()> {
        let mut state = self.lock();

        if state.rejected_topics.contains(message.topic)
            || state.rejected_payloads.contains(message.payload)
        {
            return Err(KafkaError::MessageProduction(
                RDKafkaErrorCode::UnknownTopicOrPartition,
            ));
        }
        if state.queue_full_submissions > 0 {
            state.queue_full_submissions -= 1;
            return Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull));
        }

        state.queued.push(SentMessage {
            topic: message.topic.to_string(),
            payload: message.payload.to_vec(),
            key: message.key.map(str::to_string),
            headers: message.headers.cloned(),
            partition: message.partition,
        });
        Ok(())
    }

    fn poll(&self, _timeout: Duration) {}

    fn flush(&self, _timeout: Duration) -> KafkaResult<()> {
        let mut state = self.lock();
        state.flush_calls += 1;

        if state.never_drain {
            return Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut));
        }
        if state.pending_flushes > 0 {
            state.pending_flushes -= 1;
            return Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut));
        }

        let queued = std::mem::take(&mut state.queued);
        state.delivered.extend(queued);
        Ok(())
    }

    fn queue_len(&self) -> usize {
        self.lock().queued.len()
    }

    fn fetch_metadata(&self, _timeout: Duration) -> KafkaResult<BrokerMetadata> {
        let state = self.lock();
        match state.metadata_error {
            Some(code) => Err(KafkaError::MetadataFetch(code)),
            None => Ok(state.metadata.clone()),
        }
    }
}
