#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::KafkaConfig;
    use crate::kafka::test_utils::ScriptedClient;
    use crate::Error;
    use rdkafka::error::RDKafkaErrorCode;
    use serde_json::json;
    use std::time::Duration;

    fn create_test_kafka_config() -> KafkaConfig {
        KafkaConfig {
            brokers: "localhost:9092".to_string(),
            flush_timeout_ms: 10,
            ..KafkaConfig::default()
        }
    }

    fn create_publisher(client: ScriptedClient) -> Publisher<ScriptedClient> {
        Publisher::with_client(client, &create_test_kafka_config()).unwrap()
    }

    #[test]
    fn test_publish_drains_queue() {
        let publisher = create_publisher(ScriptedClient::new());

        publisher
            .publish_blocking("notification-events", b"hello", None)
            .unwrap();

        assert_eq!(publisher.queue_len(), 0);
        let delivered = publisher.client().delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].topic, "notification-events");
        assert_eq!(delivered[0].payload, b"hello".to_vec());
        assert_eq!(delivered[0].partition, None);
    }

    #[test]
    fn test_publish_carries_options() {
        let publisher = create_publisher(ScriptedClient::new());
        let options = PublishOptions::new()
            .with_key("user-1")
            .with_header("source", "billing")
            .with_partition(2);

        publisher
            .publish_blocking("invoices", b"{}", Some(&options))
            .unwrap();

        let sent = &publisher.client().delivered()[0];
        assert_eq!(sent.key.as_deref(), Some("user-1"));
        assert_eq!(sent.partition, Some(2));
        assert_eq!(
            sent.headers.as_ref().and_then(|h| h.get("source")).map(String::as_str),
            Some("billing")
        );
    }

    #[test]
    fn test_flush_retried_while_pending() {
        let publisher = create_publisher(ScriptedClient::new().with_pending_flushes(3));

        publisher.publish_blocking("orders", b"1", None).unwrap();

        assert_eq!(publisher.client().flush_calls(), 4);
        assert_eq!(publisher.queue_len(), 0);
    }

    #[test]
    fn test_flush_timeout_after_exactly_ten_attempts() {
        let publisher = create_publisher(ScriptedClient::new().never_drain());

        let err = publisher.publish_blocking("orders", b"1", None).unwrap_err();

        assert!(matches!(err, Error::FlushTimeout { attempts: 10, .. }));
        assert_eq!(publisher.client().flush_calls(), 10);
        assert_eq!(publisher.queue_len(), 1);
    }

    #[test]
    fn test_flush_budget_is_configurable() {
        let config = KafkaConfig {
            max_flush_attempts: 3,
            ..create_test_kafka_config()
        };
        let publisher = Publisher::with_client(ScriptedClient::new().never_drain(), &config).unwrap();

        let err = publisher.publish_blocking("orders", b"1", None).unwrap_err();

        assert!(matches!(err, Error::FlushTimeout { attempts: 3, .. }));
        assert_eq!(publisher.client().flush_calls(), 3);
    }

    #[test]
    fn test_rejected_message_is_not_flushed() {
        let publisher = create_publisher(ScriptedClient::new().reject_topic("bad topic"));

        let err = publisher.publish_blocking("bad topic", b"1", None).unwrap_err();

        match err {
            Error::DeliveryRejected { topic, source } => {
                assert_eq!(topic, "bad topic");
                assert_eq!(
                    source.rdkafka_error_code(),
                    Some(RDKafkaErrorCode::UnknownTopicOrPartition)
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(publisher.client().flush_calls(), 0);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let publisher = create_publisher(ScriptedClient::new());

        let err = publisher.publish_blocking("", b"1", None).unwrap_err();

        assert!(matches!(err, Error::DeliveryRejected { .. }));
        assert!(publisher.client().delivered().is_empty());
    }

    #[test]
    fn test_queue_full_rejected_without_block_flag() {
        let publisher = create_publisher(ScriptedClient::new().with_queue_full(1));

        let err = publisher.publish_blocking("orders", b"1", None).unwrap_err();

        assert!(matches!(err, Error::DeliveryRejected { .. }));
    }

    #[test]
    fn test_queue_full_waits_with_block_flag() {
        let publisher = create_publisher(ScriptedClient::new().with_queue_full(2));
        let options = PublishOptions::new().with_flag(DeliveryMode::Block);

        publisher
            .publish_blocking("orders", b"1", Some(&options))
            .unwrap();

        assert_eq!(publisher.client().delivered().len(), 1);
    }

    #[test]
    fn test_structured_payload_is_canonical_json() {
        let publisher = create_publisher(ScriptedClient::new());

        publisher
            .publish_structured_blocking("t", &json!({"type": "email", "to": "a@b.com"}), None)
            .unwrap();

        let sent = &publisher.client().delivered()[0];
        assert_eq!(sent.payload, br#"{"type":"email","to":"a@b.com"}"#.to_vec());
    }

    #[test]
    fn test_structured_matches_raw_publish() {
        let payload = json!({"id": 7, "tags": ["a", "b"], "score": 0.5});
        let structured = create_publisher(ScriptedClient::new());
        let raw = create_publisher(ScriptedClient::new());
        let options = PublishOptions::new().with_key("7");

        structured
            .publish_structured_blocking("t", &payload, Some(&options))
            .unwrap();
        raw.publish_blocking("t", &to_canonical_json(&payload).unwrap(), Some(&options))
            .unwrap();

        assert_eq!(structured.client().delivered(), raw.client().delivered());
    }

    #[test]
    fn test_non_finite_payload_is_encoding_error() {
        let publisher = create_publisher(ScriptedClient::new());

        let err = publisher
            .publish_structured_blocking("t", &vec![1.0, f64::INFINITY], None)
            .unwrap_err();

        assert!(matches!(err, Error::Encoding(_)));
        assert_eq!(publisher.client().flush_calls(), 0);
    }

    #[test]
    fn test_ping_reports_reachability() {
        let publisher = create_publisher(ScriptedClient::new());
        assert!(publisher.ping());

        publisher.client().set_reachable(false);
        assert!(!publisher.ping());
        assert!(!publisher.try_ping().unwrap());
    }

    #[test]
    fn test_ping_surfaces_unexpected_errors_through_try_ping() {
        let publisher = create_publisher(
            ScriptedClient::new().with_metadata_error(RDKafkaErrorCode::TopicAuthorizationFailed),
        );

        assert!(!publisher.ping());
        assert!(matches!(publisher.try_ping(), Err(Error::Metadata(_))));
    }

    #[test]
    fn test_metadata() {
        let publisher = create_publisher(ScriptedClient::new());

        let metadata = publisher.metadata().unwrap();
        assert_eq!(metadata.brokers.len(), 1);
        assert_eq!(metadata.brokers[0].port, 9092);
        assert!(metadata.topic("notification-events").unwrap().is_ok());

        publisher.client().set_reachable(false);
        assert!(matches!(publisher.metadata(), Err(Error::Metadata(_))));
    }

    #[test]
    fn test_manual_flush() {
        let publisher = create_publisher(ScriptedClient::new().with_pending_flushes(1));
        assert!(!publisher.flush(Duration::from_millis(1)));
        assert!(publisher.flush(Duration::from_millis(1)));
    }

    #[test]
    fn test_close_stops_publishing() {
        let publisher = create_publisher(ScriptedClient::new());
        let handle = publisher.clone();
        assert!(handle.is_connected());

        assert!(publisher.close(Duration::from_millis(1)));

        assert!(!handle.is_connected());
        assert!(matches!(
            handle.publish_blocking("orders", b"1", None),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_empty_brokers_rejected_before_connecting() {
        let config = KafkaConfig {
            brokers: String::new(),
            ..KafkaConfig::default()
        };

        assert!(matches!(Publisher::connect(&config), Err(Error::Config(_))));
        assert!(matches!(
            Publisher::with_client(ScriptedClient::new(), &config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_client_option_is_config_error() {
        let mut config = create_test_kafka_config();
        config
            .options
            .extra
            .insert("no.such.option".to_string(), "1".to_string());

        assert!(matches!(Publisher::connect(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_async_publish_to_default_topic() {
        let publisher = create_publisher(ScriptedClient::new());

        publisher.publish_to_default("hello", None).await.unwrap();
        publisher
            .publish_structured_to_default(&json!({"n": 1}), None)
            .await
            .unwrap();

        let delivered = publisher.client().delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|m| m.topic == "notification-events"));
        assert_eq!(delivered[1].payload, br#"{"n":1}"#.to_vec());
    }

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_publish_against_broker() {
        let config = KafkaConfig {
            brokers: std::env::var("TEST_KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            ..KafkaConfig::default()
        };
        let publisher = Publisher::connect(&config).unwrap();

        publisher
            .publish("notification-events", "hello", None)
            .await
            .unwrap();

        assert_eq!(publisher.queue_len(), 0);
        assert!(publisher.ping());
    }
}
