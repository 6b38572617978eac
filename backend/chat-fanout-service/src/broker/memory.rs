use super::{MessageBroker, PayloadStream};
use crate::error::FanoutError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{future, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process broker with Redis Pub/Sub semantics: payloads published while
/// nobody is subscribed are lost.
pub struct InMemoryBroker {
    channels: DashMap<String, broadcast::Sender<String>>,
    subscriptions: DashMap<String, usize>,
    capacity: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of `subscribe` calls ever made for `channel`.
    pub fn subscription_count(&self, channel: &str) -> usize {
        self.subscriptions.get(channel).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError> {
        // No receivers is not an error for pub/sub.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, FanoutError> {
        let receiver = self.sender(channel).subscribe();
        *self.subscriptions.entry(channel.to_string()).or_insert(0) += 1;

        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let payload = match item {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, channel = %channel, "in-memory subscriber lagged");
                    None
                }
            };
            future::ready(payload)
        });

        Ok(stream.boxed())
    }
}
