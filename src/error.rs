//! Error types and result handling for kafka-courier.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_courier::{Error, Result};
//!
//! fn load_brokers(brokers: &str) -> Result<()> {
//!     if brokers.is_empty() {
//!         return Err(Error::Config("kafka.brokers must not be empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! match load_brokers("") {
//!     Ok(()) => println!("Loaded"),
//!     Err(Error::Config(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use rdkafka::error::KafkaError;
use thiserror::Error;

/// The main error type for kafka-courier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration. Raised before any client exists.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A structured payload could not be encoded as canonical JSON.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The client refused to enqueue the message (unknown topic, oversized
    /// message, invalid partition, ...). Never retried by the publisher.
    #[error("Delivery to '{topic}' rejected: {source}")]
    DeliveryRejected {
        /// Destination topic
        topic: String,
        /// Error reported by the client
        source: KafkaError,
    },

    /// The outgoing queue was still pending after every flush attempt.
    #[error("Unable to flush messages for '{topic}' after {attempts} attempts")]
    FlushTimeout {
        /// Destination topic
        topic: String,
        /// Number of flush calls made
        attempts: u32,
    },

    /// Cluster metadata could not be fetched.
    #[error("Metadata error: {0}")]
    Metadata(KafkaError),

    /// Kafka client error not covered by a more specific variant.
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Dead-letter store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// PostgreSQL client error from the dead-letter store.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// I/O error, typically from the file-backed dead-letter store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking publish task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The publisher was closed and no longer accepts messages.
    #[error("Publisher is closed")]
    Closed,
}

impl Error {
    /// Returns `true` for failures of the dead-letter store itself.
    ///
    /// These are more severe than the publish failure that triggered the
    /// write, since the message is then lost.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Postgres(_) | Error::Io(_))
    }
}

/// A convenient Result type alias for kafka-courier operations.
///
/// This is equivalent to `std::result::Result<T, kafka_courier::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::RDKafkaErrorCode;

    #[test]
    fn test_flush_timeout_message() {
        let err = Error::FlushTimeout {
            topic: "orders".to_string(),
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "Unable to flush messages for 'orders' after 10 attempts"
        );
    }

    #[test]
    fn test_store_error_classification() {
        assert!(Error::Store("disk full".to_string()).is_store_error());
        assert!(Error::Io(std::io::Error::other("boom")).is_store_error());
        assert!(!Error::Closed.is_store_error());
        assert!(!Error::Metadata(KafkaError::MetadataFetch(
            RDKafkaErrorCode::BrokerTransportFailure
        ))
        .is_store_error());
    }
}
