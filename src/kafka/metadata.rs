use rdkafka::error::RDKafkaErrorCode;
use rdkafka::metadata::Metadata;
use serde::Serialize;

/// Owned snapshot of cluster metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerMetadata {
    pub brokers: Vec<BrokerInfo>,
    pub topics: Vec<TopicInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: usize,
    /// Broker-reported error for the topic, if any.
    pub error: Option<String>,
}

impl TopicInfo {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl BrokerMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicInfo> {
        self.topics.iter().find(|topic| topic.name == name)
    }
}

impl From<&Metadata> for BrokerMetadata {
    fn from(metadata: &Metadata) -> Self {
        let brokers = metadata
            .brokers()
            .iter()
            .map(|broker| BrokerInfo {
                id: broker.id(),
                host: broker.host().to_string(),
                port: broker.port(),
            })
            .collect();

        let topics = metadata
            .topics()
            .iter()
            .map(|topic| TopicInfo {
                name: topic.name().to_string(),
                partitions: topic.partitions().len(),
                error: topic
                    .error()
                    .map(|err| RDKafkaErrorCode::from(err).to_string()),
            })
            .collect();

        Self { brokers, topics }
    }
}
