use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a message is handed to the client's local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Fail immediately when the local queue is full.
    #[default]
    NonBlocking,
    /// Service callbacks and re-submit while the local queue is full.
    Block,
}

/// Per-message publish options. Persisted alongside failed messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishOptions {
    /// Partitioning key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Explicit partition; `None` lets the client choose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<DeliveryMode>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_flag(mut self, flag: DeliveryMode) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.flag.unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
