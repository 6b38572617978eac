//! Inbound gateway: client chat lines → broker.

use crate::broker::MessageBroker;
use crate::error::FanoutError;
use crate::metrics::INBOUND_MESSAGES_TOTAL;
use crate::models::ChatMessage;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to one client line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Published,
    /// Empty line, nothing to publish.
    Skipped,
}

/// Totals for one connection's inbound stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GatewayReport {
    pub published: usize,
    pub dropped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct InboundGateway {
    broker: Arc<dyn MessageBroker>,
    channel: String,
    publish_timeout: Duration,
}

impl InboundGateway {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        channel: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            channel: channel.into(),
            publish_timeout,
        }
    }

    /// Attribute `line` to `sender` and publish it to the client-to-broker
    /// channel.
    pub async fn forward(&self, sender: &str, line: &str) -> Result<Forwarded, FanoutError> {
        if line.is_empty() {
            return Ok(Forwarded::Skipped);
        }

        let payload = ChatMessage::parse(sender, line)?.to_envelope().to_json()?;

        match tokio::time::timeout(self.publish_timeout, self.broker.publish(&self.channel, payload))
            .await
        {
            Ok(result) => result.map(|()| Forwarded::Published),
            Err(_) => Err(FanoutError::PublishFailure {
                channel: self.channel.clone(),
                reason: format!("timed out after {:?}", self.publish_timeout),
            }),
        }
    }

    /// Forward every line until the client stream ends. Per-line failures
    /// are logged and counted; they never end the stream.
    pub async fn run<S>(&self, sender: &str, mut lines: S) -> GatewayReport
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut report = GatewayReport::default();

        while let Some(line) = lines.next().await {
            match self.forward(sender, &line).await {
                Ok(Forwarded::Published) => {
                    report.published += 1;
                    INBOUND_MESSAGES_TOTAL.with_label_values(&["published"]).inc();
                }
                Ok(Forwarded::Skipped) => {
                    INBOUND_MESSAGES_TOTAL.with_label_values(&["skipped"]).inc();
                }
                Err(FanoutError::MalformedTarget(raw)) => {
                    report.dropped += 1;
                    INBOUND_MESSAGES_TOTAL.with_label_values(&["malformed"]).inc();
                    debug!(user = %sender, line = %raw, "Dropping directed message without body");
                }
                Err(e) => {
                    report.failed += 1;
                    INBOUND_MESSAGES_TOTAL.with_label_values(&["failed"]).inc();
                    warn!(user = %sender, error = %e, "Failed to publish chat message");
                }
            }
        }

        debug!(
            user = %sender,
            published = report.published,
            dropped = report.dropped,
            failed = report.failed,
            "Inbound stream ended"
        );

        report
    }
}
