#![allow(dead_code)]

use kafka_courier::config::{AsyncConfig, KafkaConfig};
use kafka_courier::dead_letter::JsonFileStore;
use kafka_courier::kafka::test_utils::ScriptedClient;
use kafka_courier::Publisher;
use std::env;
use tempfile::TempDir;

/// Kafka settings for tests. Brokers come from `TEST_KAFKA_BROKERS` for the
/// tests that talk to a real cluster.
pub fn get_test_kafka_config() -> KafkaConfig {
    KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
        default_topic: format!("test_{}", std::process::id()),
        flush_timeout_ms: 10,
        ..KafkaConfig::default()
    }
}

pub fn async_config(enabled: bool) -> AsyncConfig {
    AsyncConfig {
        enabled,
        queue: "test".to_string(),
        workers: 2,
        capacity: 16,
    }
}

pub fn scripted_publisher(client: ScriptedClient) -> Publisher<ScriptedClient> {
    Publisher::with_client(client, &get_test_kafka_config()).unwrap()
}

/// A file store in its own temporary directory. Keep the `TempDir` alive
/// for as long as the store is used.
pub fn temp_store() -> (TempDir, JsonFileStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(temp_dir.path().join("kafka_failed_messages.json"));
    (temp_dir, store)
}
