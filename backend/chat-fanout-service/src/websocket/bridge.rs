//! Broker bridge: one shared upstream subscription per topic.
//!
//! The first attach to a topic subscribes to the broker and spawns a pump
//! task that decodes payloads into the topic's [`Multicast`]. Every later
//! attach only adds a consumer queue. When the upstream stream ends (Redis
//! connection lost, server restart) the pump resubscribes with backoff and
//! keeps feeding the same multicast, so attached connections stay up.
//! Connections never own or cancel the upstream subscription;
//! [`BrokerBridge::shutdown`] does.

use super::{Multicast, Subscription};
use crate::broker::{MessageBroker, PayloadStream};
use crate::config::ChannelConfig;
use crate::error::FanoutError;
use crate::metrics::BRIDGE_MESSAGES_TOTAL;
use crate::models::{ChatMessage, Comment, FanoutMessage};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RESUBSCRIBE_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(10);

struct TopicBridge<T> {
    channel: String,
    capacity: usize,
    stream: OnceCell<Multicast<T>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: FanoutMessage> TopicBridge<T> {
    fn new(channel: impl Into<String>, capacity: usize) -> Self {
        Self {
            channel: channel.into(),
            capacity,
            stream: OnceCell::new(),
            pump: Mutex::new(None),
        }
    }

    async fn attach(
        &self,
        broker: &Arc<dyn MessageBroker>,
        runtime: &Handle,
    ) -> Result<Subscription<T>, FanoutError> {
        // Concurrent first attaches wait on the same initialization; a failed
        // subscribe leaves the cell empty so the next attach retries.
        let multicast = self
            .stream
            .get_or_try_init(|| async {
                let upstream = broker.subscribe(&self.channel).await?;
                let multicast = Multicast::new(T::TOPIC, self.capacity);
                let handle = runtime.spawn(pump::<T>(
                    Arc::clone(broker),
                    self.channel.clone(),
                    upstream,
                    multicast.clone(),
                ));
                *self.pump.lock().await = Some(handle);

                info!(topic = T::TOPIC, channel = %self.channel, "Subscribed to broker channel");
                Ok::<_, FanoutError>(multicast)
            })
            .await?;

        Ok(multicast.attach().await)
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        if let Some(multicast) = self.stream.get() {
            multicast.close().await;
        }
    }
}

async fn pump<T: FanoutMessage>(
    broker: Arc<dyn MessageBroker>,
    channel: String,
    mut upstream: PayloadStream,
    multicast: Multicast<T>,
) {
    let mut backoff = RESUBSCRIBE_BACKOFF_INITIAL;

    loop {
        let mut received_any = false;
        while let Some(raw) = upstream.next().await {
            received_any = true;
            fan_out(&channel, &raw, &multicast).await;
        }

        warn!(topic = T::TOPIC, channel = %channel, "Broker subscription ended, resubscribing");

        // Back off only when the ended stream delivered nothing.
        if received_any {
            backoff = RESUBSCRIBE_BACKOFF_INITIAL;
        } else {
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }

        upstream = loop {
            match broker.subscribe(&channel).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!(
                        topic = T::TOPIC,
                        channel = %channel,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Broker resubscribe failed"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        };

        BRIDGE_MESSAGES_TOTAL
            .with_label_values(&[T::TOPIC, "resubscribed"])
            .inc();
        info!(topic = T::TOPIC, channel = %channel, "Resubscribed to broker channel");
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RESUBSCRIBE_BACKOFF_MAX)
}

async fn fan_out<T: FanoutMessage>(channel: &str, raw: &str, multicast: &Multicast<T>) {
    match T::decode(raw) {
        Ok(message) => {
            BRIDGE_MESSAGES_TOTAL
                .with_label_values(&[T::TOPIC, "received"])
                .inc();

            let outcome = multicast.push(message).await;
            if outcome.dropped > 0 {
                BRIDGE_MESSAGES_TOTAL
                    .with_label_values(&[T::TOPIC, "overflow_dropped"])
                    .inc_by(outcome.dropped as u64);
            }
            debug!(
                topic = T::TOPIC,
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "Fanned out broker message"
            );
        }
        Err(e) => {
            BRIDGE_MESSAGES_TOTAL
                .with_label_values(&[T::TOPIC, "decode_failure"])
                .inc();
            warn!(topic = T::TOPIC, channel = %channel, error = %e, "Skipping undecodable broker payload");
        }
    }
}

/// Owner of the comment and chat topic subscriptions.
pub struct BrokerBridge {
    broker: Arc<dyn MessageBroker>,
    runtime: Handle,
    comments: TopicBridge<Comment>,
    chat: TopicBridge<ChatMessage>,
}

impl BrokerBridge {
    /// `runtime` must outlive the HTTP workers; pump tasks are spawned on it.
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        runtime: Handle,
        channels: &ChannelConfig,
        capacity: usize,
    ) -> Self {
        Self {
            broker,
            runtime,
            comments: TopicBridge::new(channels.new_comments.clone(), capacity),
            chat: TopicBridge::new(channels.broker_to_client.clone(), capacity),
        }
    }

    pub async fn attach_comments(&self) -> Result<Subscription<Comment>, FanoutError> {
        self.comments.attach(&self.broker, &self.runtime).await
    }

    pub async fn attach_chat(&self) -> Result<Subscription<ChatMessage>, FanoutError> {
        self.chat.attach(&self.broker, &self.runtime).await
    }

    pub async fn shutdown(&self) {
        self.comments.shutdown().await;
        self.chat.shutdown().await;
        info!("Broker bridge shut down");
    }
}
