use super::{MessageBroker, PayloadStream};
use crate::error::FanoutError;
use async_trait::async_trait;
use futures::{future, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

/// Redis Pub/Sub broker.
///
/// Publishing shares one multiplexed `ConnectionManager`; every subscription
/// needs a dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, FanoutError> {
        let client = Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!("Redis broker connected");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError> {
        let mut conn = self.publisher.clone();
        let receivers: usize =
            conn.publish(channel, payload)
                .await
                .map_err(|e| FanoutError::PublishFailure {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                })?;

        debug!(channel = %channel, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, FanoutError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        info!(channel = %channel, "Subscribed to redis channel");

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = ?e, channel = %channel, "Failed to read pub/sub payload");
                    None
                }
            };
            future::ready(payload)
        });

        Ok(stream.boxed())
    }
}
