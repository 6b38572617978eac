use super::{InMemoryBroker, MessageBroker, PayloadStream};
use crate::error::FanoutError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory broker that can be switched into an outage.
#[derive(Default)]
pub(crate) struct OutageBroker {
    inner: InMemoryBroker,
    down: AtomicBool,
}

impl OutageBroker {
    /// Publish and subscribe fail while `down` is set.
    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn inner(&self) -> &InMemoryBroker {
        &self.inner
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBroker for OutageBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError> {
        if self.is_down() {
            return Err(FanoutError::PublishFailure {
                channel: channel.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, FanoutError> {
        if self.is_down() {
            return Err(FanoutError::Broker("broker unavailable".to_string()));
        }
        self.inner.subscribe(channel).await
    }
}

mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_outage_fails_then_recovers() {
        let broker = OutageBroker::default();
        broker.set_down(true);

        assert!(matches!(
            broker.publish("chat", "x".into()).await,
            Err(FanoutError::PublishFailure { .. })
        ));
        assert!(matches!(
            broker.subscribe("chat").await,
            Err(FanoutError::Broker(_))
        ));
        assert_eq!(broker.inner().subscription_count("chat"), 0);

        broker.set_down(false);
        let mut stream = broker.subscribe("chat").await.unwrap();
        broker.publish("chat", "x".into()).await.unwrap();
        assert_eq!(stream.next().await.as_deref(), Some("x"));
    }
}
