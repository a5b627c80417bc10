//! Redpanda broker adapter for flashsale.
//!
//! Implements [`MessageBroker`] over rdkafka for any Kafka-compatible
//! cluster (Redpanda, Apache Kafka, MSK). The coupon issuance pipeline and
//! the outbox publisher both go through this adapter in production; tests
//! use the in-memory broker from `flashsale-testing` instead.
//!
//! # Wire mapping
//!
//! A [`BrokerMessage`] maps onto a Kafka record as:
//!
//! - `key` becomes the partition key (the issuance topic keys by member
//!   email, so one member's claims stay on one partition),
//! - `event_id` and `timestamp` travel as record headers,
//! - `payload` is the record body, unchanged (JSON for every topic here).
//!
//! # Delivery semantics
//!
//! At-least-once, with manual offset commits: an offset is committed only
//! after the message has been handed to the subscriber's channel. A crash
//! before the commit redelivers, which the consumer absorbs with its dedup
//! marker and unique grant constraint.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redpanda::RedpandaBroker;
//! use flashsale_core::broker::{BrokerMessage, COUPON_ISSUE_TOPIC, MessageBroker};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("coupon-issuance")
//!     .build()?;
//!
//! let mut stream = broker.subscribe(&[COUPON_ISSUE_TOPIC]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("received {}", message.event_id),
//!         Err(e) => eprintln!("error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use flashsale_core::broker::{BrokerError, BrokerMessage, MessageBroker, MessageStream};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

const EVENT_ID_HEADER: &str = "event_id";
const TIMESTAMP_HEADER: &str = "timestamp";

/// Kafka-compatible [`MessageBroker`] backed by rdkafka.
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Connect with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// The configured bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Comma-separated bootstrap servers (e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: "0", "1", or "all". Default "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    /// Default "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group id for subscriptions.
    ///
    /// Instances sharing a group split the partitions between them; this
    /// is how the issuance consumer scales horizontally. If unset, a group
    /// id is derived from the sorted topic names.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Channel capacity between the consumer task and the subscriber.
    /// Default 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where new consumer groups start reading: "earliest" or "latest".
    /// Default "latest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] when brokers are not set
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            BrokerError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "redpanda broker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

fn decode_record<M: Message>(message: &M) -> Result<BrokerMessage, BrokerError> {
    let payload = message
        .payload()
        .ok_or_else(|| BrokerError::DeserializationFailed("record has no payload".to_string()))?
        .to_vec();

    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned());

    let mut event_id = None;
    let mut timestamp = None;
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match (header.key, header.value) {
                (EVENT_ID_HEADER, Some(value)) => {
                    event_id = Some(String::from_utf8_lossy(value).into_owned());
                },
                (TIMESTAMP_HEADER, Some(value)) => {
                    timestamp = DateTime::parse_from_rfc3339(&String::from_utf8_lossy(value))
                        .ok()
                        .map(|t| t.with_timezone(&Utc));
                },
                _ => {},
            }
        }
    }

    let event_id = event_id.ok_or_else(|| {
        BrokerError::DeserializationFailed("record has no event_id header".to_string())
    })?;
    // Fall back to the broker-assigned timestamp for records produced by
    // other clients.
    let timestamp = timestamp
        .or_else(|| {
            message
                .timestamp()
                .to_millis()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        })
        .unwrap_or_else(Utc::now);

    Ok(BrokerMessage {
        key,
        event_id,
        timestamp,
        payload,
    })
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: EVENT_ID_HEADER,
                    value: Some(message.event_id.as_bytes()),
                })
                .insert(Header {
                    key: TIMESTAMP_HEADER,
                    value: Some(message.timestamp.to_rfc3339().as_bytes()),
                });

            let mut record = FutureRecord::to(&topic)
                .payload(&message.payload)
                .headers(headers);
            if let Some(key) = &message.key {
                record = record.key(key.as_bytes());
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_id = %message.event_id,
                        "message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(&self, topics: &[&str]) -> BoxFuture<'_, Result<MessageStream, BrokerError>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("flashsale-{}", sorted_topics.join("-"))
            });

            // Manual commit for at-least-once delivery.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "subscribed"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The consumer lives in this task; offsets commit only after
            // the message reached the channel.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(record) => {
                            let decoded = decode_record(&record);
                            let undecodable = decoded.is_err();
                            if tx.send(decoded).await.is_err() {
                                // Receiver dropped; exit without committing.
                                break;
                            }
                            if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                                tracing::warn!(
                                    topic = record.topic(),
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    error = %e,
                                    "offset commit failed, record may be redelivered"
                                );
                            } else if undecodable {
                                tracing::warn!(
                                    topic = record.topic(),
                                    offset = record.offset(),
                                    "undecodable record committed and skipped"
                                );
                            }
                        },
                        Err(e) => {
                            let err =
                                BrokerError::TransportError(format!("receive failed: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        },
                    }
                }
                tracing::debug!("consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rdkafka::Timestamp;
    use rdkafka::message::OwnedMessage;

    #[test]
    fn broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn builder_default_works() {
        let _builder = RedpandaBroker::builder();
    }

    #[test]
    fn decodes_record_with_headers() {
        let ts = "2025-06-01T12:00:00+00:00";
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: EVENT_ID_HEADER,
                value: Some(b"evt-1".as_slice()),
            })
            .insert(Header {
                key: TIMESTAMP_HEADER,
                value: Some(ts.as_bytes()),
            });
        let record = OwnedMessage::new(
            Some(br#"{"member_email":"user@example.com"}"#.to_vec()),
            Some(b"user@example.com".to_vec()),
            "coupon-issue-events".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            Some(headers),
        );

        let message = decode_record(&record).unwrap();
        assert_eq!(message.event_id, "evt-1");
        assert_eq!(message.key.as_deref(), Some("user@example.com"));
        assert_eq!(message.timestamp.to_rfc3339(), ts);

        let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body["member_email"], "user@example.com");
    }

    #[test]
    fn record_without_event_id_is_rejected() {
        let record = OwnedMessage::new(
            Some(b"{}".to_vec()),
            None,
            "coupon-issue-events".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            None,
        );
        assert!(matches!(
            decode_record(&record),
            Err(BrokerError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn payloadless_record_is_rejected() {
        let record = OwnedMessage::new(
            None,
            None,
            "coupon-issue-events".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            None,
        );
        assert!(decode_record(&record).is_err());
    }
}
