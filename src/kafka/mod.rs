pub mod client;
pub mod encoding;
pub mod metadata;
pub mod options;
pub mod publisher;
#[doc(hidden)]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use client::{OutgoingMessage, ProducerClient, RdKafkaClient};
pub use encoding::to_canonical_json;
pub use metadata::{BrokerInfo, BrokerMetadata, TopicInfo};
pub use options::{DeliveryMode, PublishOptions};
pub use publisher::Publisher;
