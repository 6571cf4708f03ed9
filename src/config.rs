use crate::{Error, Result};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys owned by the typed configuration; they may not appear in
/// `kafka.options.extra`.
const RESERVED_KEYS: &[&str] = &[
    "bootstrap.servers",
    "metadata.broker.list",
    "client.id",
    "acks",
    "compression.type",
    "linger.ms",
    "message.timeout.ms",
    "queue.buffering.max.messages",
    "enable.idempotence",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default, rename = "async")]
    pub dispatch: AsyncConfig,
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub default_topic: String,
    #[serde(default)]
    pub options: ProducerOptions,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_max_flush_attempts")]
    pub max_flush_attempts: u32,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

/// Client tuning. Recognized keys are typed; anything else goes through
/// `extra` verbatim.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProducerOptions {
    pub client_id: Option<String>,
    pub acks: Option<Acks>,
    pub compression: Option<Compression>,
    pub linger_ms: Option<u32>,
    pub message_timeout_ms: Option<u32>,
    pub queue_buffering_max_messages: Option<u32>,
    pub enable_idempotence: Option<bool>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    #[serde(rename = "0")]
    None,
    #[serde(rename = "1")]
    Leader,
    All,
}

impl Acks {
    fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsyncConfig {
    #[serde(default = "default_async_enabled")]
    pub enabled: bool,
    /// Name of the dispatch queue; used to label worker logs.
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    #[default]
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeadLetterConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// tokio-postgres connection string, required for the postgres backend.
    pub url: Option<String>,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(env_source())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from `KAFKA_COURIER_*` variables alone.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(env_source())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kafka.validate()?;

        if self.dispatch.workers == 0 {
            return Err(Error::Config("async.workers must be at least 1".to_string()));
        }
        if self.dispatch.capacity == 0 {
            return Err(Error::Config("async.capacity must be at least 1".to_string()));
        }
        if self.dispatch.queue.trim().is_empty() {
            return Err(Error::Config("async.queue must not be empty".to_string()));
        }

        match self.dead_letter.backend {
            StoreBackend::Postgres if self.dead_letter.url.is_none() => Err(Error::Config(
                "dead_letter.url is required for the postgres backend".to_string(),
            )),
            StoreBackend::File if self.dead_letter.path.as_os_str().is_empty() => Err(
                Error::Config("dead_letter.path must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("KAFKA_COURIER")
        .prefix_separator("_")
        .separator("__")
}

impl KafkaConfig {
    /// Parses `brokers` into trimmed `host:port` entries.
    pub fn broker_list(&self) -> Result<Vec<String>> {
        if self.brokers.trim().is_empty() {
            return Err(Error::Config("kafka.brokers must not be empty".to_string()));
        }

        self.brokers
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                let (host, port) = entry.rsplit_once(':').ok_or_else(|| {
                    Error::Config(format!("broker '{}' is not in host:port form", entry))
                })?;
                if host.is_empty() {
                    return Err(Error::Config(format!("broker '{}' has no host", entry)));
                }
                port.parse::<u16>().map_err(|_| {
                    Error::Config(format!("broker '{}' has an invalid port", entry))
                })?;
                Ok(entry.to_string())
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.broker_list()?;

        if self.flush_timeout_ms == 0 {
            return Err(Error::Config("kafka.flush_timeout_ms must be positive".to_string()));
        }
        if self.max_flush_attempts == 0 {
            return Err(Error::Config(
                "kafka.max_flush_attempts must be at least 1".to_string(),
            ));
        }
        if self.metadata_timeout_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(Error::Config("metadata timeouts must be positive".to_string()));
        }

        for key in self.options.extra.keys() {
            if key.trim().is_empty() {
                return Err(Error::Config("empty key in kafka.options.extra".to_string()));
            }
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(Error::Config(format!(
                    "'{}' must be set through its typed option, not kafka.options.extra",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Builds the rdkafka client configuration. Validates first.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.validate()?;
        let brokers = self.broker_list()?.join(",");

        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", brokers);

        let opts = &self.options;
        if let Some(client_id) = &opts.client_id {
            client.set("client.id", client_id);
        }
        if let Some(acks) = opts.acks {
            client.set("acks", acks.as_str());
        }
        if let Some(compression) = opts.compression {
            client.set("compression.type", compression.as_str());
        }
        if let Some(linger) = opts.linger_ms {
            client.set("linger.ms", linger.to_string());
        }
        if let Some(timeout) = opts.message_timeout_ms {
            client.set("message.timeout.ms", timeout.to_string());
        }
        if let Some(max) = opts.queue_buffering_max_messages {
            client.set("queue.buffering.max.messages", max.to_string());
        }
        if let Some(idempotence) = opts.enable_idempotence {
            client.set("enable.idempotence", idempotence.to_string());
        }
        for (key, value) in &opts.extra {
            client.set(key, value);
        }

        Ok(client)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            default_topic: default_topic(),
            options: ProducerOptions::default(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_flush_attempts: default_max_flush_attempts(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }
}

impl AsyncConfig {
    /// The same settings with worker dispatch turned off, for one-shot
    /// callers that publish on their own task.
    pub fn inline(&self) -> Self {
        Self {
            enabled: false,
            ..self.clone()
        }
    }
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_async_enabled(),
            queue: default_queue(),
            workers: default_workers(),
            capacity: default_capacity(),
        }
    }
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            path: default_store_path(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "notification-events".to_string()
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

fn default_max_flush_attempts() -> u32 {
    10
}

fn default_metadata_timeout_ms() -> u64 {
    10_000
}

fn default_ping_timeout_ms() -> u64 {
    1_000
}

fn default_async_enabled() -> bool {
    true
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_capacity() -> usize {
    1024
}

fn default_store_path() -> PathBuf {
    PathBuf::from("kafka_failed_messages.json")
}
