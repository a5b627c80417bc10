//! Message broker abstraction for the asynchronous pipelines.
//!
//! The coupon issuance pipeline and the outbox publisher both talk to a
//! Kafka-compatible broker through this trait. Delivery is at-least-once:
//! consumers must be idempotent, which the coupon pipeline achieves with
//! dedup markers and a unique grant constraint.
//!
//! ```text
//! request path                       background
//! ────────────                       ──────────
//! producer ──publish──► topic ──subscribe──► batching consumer
//! outbox row ─publish─► topic(event_type)   (downstream systems)
//! ```
//!
//! Ordering is guaranteed only within a partition; the coupon topic is
//! keyed by member email so one member's claims stay ordered.

use chrono::{DateTime, Utc};
use futures::Stream;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Topic for coupon issuance requests.
pub const COUPON_ISSUE_TOPIC: &str = "coupon-issue-events";

/// Errors from broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Could not connect to any broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A publish did not complete.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// A subscription could not be established.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A message could not be decoded.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error mid-stream.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// A message on the wire.
///
/// `payload` is an opaque byte body (JSON for every topic in this system);
/// `event_id` and `timestamp` travel as headers on Kafka, `key` is the
/// partition key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Partition key, when the topic partitions by one.
    pub key: Option<String>,
    /// Unique event id, carried as a header.
    pub event_id: String,
    /// Producer-side timestamp, carried as a header.
    pub timestamp: DateTime<Utc>,
    /// Serialized body.
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Build a message with a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeserializationFailed`] if `body` cannot be
    /// serialized.
    pub fn json<T: Serialize>(
        key: Option<String>,
        event_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        body: &T,
    ) -> Result<Self, BrokerError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| BrokerError::DeserializationFailed(e.to_string()))?;
        Ok(Self {
            key,
            event_id: event_id.into(),
            timestamp,
            payload,
        })
    }

    /// Decode the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeserializationFailed`] if the payload is not
    /// valid JSON for `T`.
    pub fn decode_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, BrokerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| BrokerError::DeserializationFailed(e.to_string()))
    }
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BrokerMessage, BrokerError>> + Send>>;

/// Publish/subscribe access to the broker.
///
/// # Dyn compatibility
///
/// Methods return `BoxFuture` instead of using `async fn` so the broker can
/// be held as `Arc<dyn MessageBroker>` by the producer, consumer, and
/// outbox publisher.
pub trait MessageBroker: Send + Sync {
    /// Publish a message to a topic with at-least-once semantics.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker did not accept
    /// the message.
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe to topics, returning a stream of messages.
    ///
    /// Consumers sharing a group id split the partitions between them;
    /// within this process the pipeline funnels the stream into a single
    /// consumer loop.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription
    /// could not be established.
    fn subscribe(&self, topics: &[&str]) -> BoxFuture<'_, Result<MessageStream, BrokerError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Body {
        email: String,
    }

    #[test]
    fn json_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap();
        let msg = BrokerMessage::json(
            Some("user@example.com".to_string()),
            "evt-1",
            ts,
            &Body {
                email: "user@example.com".to_string(),
            },
        )
        .unwrap();

        assert_eq!(msg.event_id, "evt-1");
        let body: Body = msg.decode_json().unwrap();
        assert_eq!(body.email, "user@example.com");
    }

    #[test]
    fn decode_rejects_garbage() {
        let msg = BrokerMessage {
            key: None,
            event_id: "evt-2".to_string(),
            timestamp: Utc::now(),
            payload: b"not json".to_vec(),
        };
        assert!(msg.decode_json::<Body>().is_err());
    }
}
