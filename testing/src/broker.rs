//! In-memory message broker.
//!
//! Topics are mpsc channels; every subscriber of a topic receives every
//! message published after it subscribed. Published messages are also kept
//! in a log so tests can assert on what went out without subscribing.

use async_stream::stream;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use flashsale_core::broker::{BrokerError, BrokerMessage, MessageBroker, MessageStream};

const CHANNEL_CAPACITY: usize = 256;

/// In-memory [`MessageBroker`] backed by per-topic channels.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BrokerMessage>>>>,
    published: Mutex<Vec<(String, BrokerMessage)>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, as `(topic, message)` pairs.
    #[must_use]
    pub fn published(&self) -> Vec<(String, BrokerMessage)> {
        match self.published.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages published to one topic.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<BrokerMessage> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m)
            .collect()
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            let senders = {
                let mut subscribers = match self.subscribers.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(list) = subscribers.get_mut(&topic) {
                    list.retain(|tx| !tx.is_closed());
                    list.clone()
                } else {
                    Vec::new()
                }
            };

            for tx in senders {
                tx.send(message.clone())
                    .await
                    .map_err(|_| BrokerError::PublishFailed {
                        topic: topic.clone(),
                        reason: "subscriber dropped".to_string(),
                    })?;
            }

            match self.published.lock() {
                Ok(mut log) => log.push((topic, message)),
                Err(poisoned) => poisoned.into_inner().push((topic, message)),
            }
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[&str]) -> BoxFuture<'_, Result<MessageStream, BrokerError>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
            {
                let mut subscribers = match self.subscribers.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for topic in topics {
                    subscribers.entry(topic).or_default().push(tx.clone());
                }
            }

            let stream = stream! {
                while let Some(message) = rx.recv().await {
                    yield Ok(message);
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
    use chrono::Utc;
    use futures::StreamExt;

    fn msg(event_id: &str, key: Option<&str>) -> BrokerMessage {
        BrokerMessage {
            key: key.map(ToString::to_string),
            event_id: event_id.to_string(),
            timestamp: Utc::now(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_later_publishes() {
        let broker = InMemoryBroker::new();
        let mut stream = broker.subscribe(&["t"]).await.unwrap();

        broker.publish("t", &msg("evt-1", None)).await.unwrap();
        broker.publish("t", &msg("evt-2", None)).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_id, "evt-1");
        assert_eq!(second.event_id, "evt-2");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_logged() {
        let broker = InMemoryBroker::new();
        broker.publish("t", &msg("evt-1", Some("a@b.c"))).await.unwrap();

        let log = broker.published_to("t");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].key.as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe(&["a"]).await.unwrap();

        broker.publish("b", &msg("evt-b", None)).await.unwrap();
        broker.publish("a", &msg("evt-a", None)).await.unwrap();

        let got = a.next().await.unwrap().unwrap();
        assert_eq!(got.event_id, "evt-a");
    }
}
