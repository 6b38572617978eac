//! Publish/subscribe transport behind the fan-out bridge.
//!
//! The broker is opaque: at-least-once, ordered within a channel, no ordering
//! across channels. Payloads are plain strings; decoding belongs to the bridge.

use crate::error::FanoutError;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod memory;
pub mod redis_pubsub;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::InMemoryBroker;
pub use redis_pubsub::RedisBroker;

/// Live payloads delivered on one subscribed channel.
pub type PayloadStream = BoxStream<'static, String>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Fire-and-forget publish. Returns once the broker accepted the payload.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError>;

    /// Open a new subscription. Each call creates an independent upstream
    /// subscription; callers that need sharing must do it themselves.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, FanoutError>;
}
