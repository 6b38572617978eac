//! Per-connection fan-out: filter, render and write topic messages for one
//! viewer.

use super::sink::ConnectionSink;
use super::Subscription;
use crate::error::FanoutError;
use crate::metrics::{DELIVERIES_TOTAL, DISPATCHER_OUTCOMES_TOTAL};
use crate::models::{FanoutMessage, UserIdentity};
use std::future::Future;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Attached,
    Delivering,
    /// Connection closed or upstream ended.
    Detached,
    /// Write or render error. Terminal, never retried.
    Failed,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherState::Attached => "attached",
            DispatcherState::Delivering => "delivering",
            DispatcherState::Detached => "detached",
            DispatcherState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub state: DispatcherState,
    pub delivered: usize,
    pub filtered: usize,
    pub error: Option<FanoutError>,
}

pub struct FanoutDispatcher<T> {
    viewer: UserIdentity,
    subscription: Subscription<T>,
    state: DispatcherState,
}

impl<T: FanoutMessage> FanoutDispatcher<T> {
    pub fn new(viewer: impl Into<UserIdentity>, subscription: Subscription<T>) -> Self {
        Self {
            viewer: viewer.into(),
            subscription,
            state: DispatcherState::Attached,
        }
    }

    /// Deliver messages to `sink` in arrival order until `shutdown` resolves,
    /// the upstream ends, or a write fails.
    pub async fn run<S, F>(mut self, sink: &mut S, shutdown: F) -> DispatchReport
    where
        S: ConnectionSink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut delivered = 0;
        let mut filtered = 0;
        let mut error = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = self.subscription.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            self.state = DispatcherState::Delivering;

            let text = match message.render_for(&self.viewer) {
                Ok(Some(text)) => text,
                Ok(None) => {
                    filtered += 1;
                    continue;
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            };

            if let Err(e) = sink.send_text(text).await {
                error = Some(e);
                break;
            }
            delivered += 1;
            DELIVERIES_TOTAL.with_label_values(&[T::TOPIC]).inc();
        }

        self.state = if error.is_some() {
            DispatcherState::Failed
        } else {
            DispatcherState::Detached
        };

        DISPATCHER_OUTCOMES_TOTAL
            .with_label_values(&[T::TOPIC, self.state.as_str()])
            .inc();

        match &error {
            Some(e) => warn!(
                topic = T::TOPIC,
                viewer = %self.viewer,
                delivered,
                error = %e,
                "Dispatcher failed"
            ),
            None => debug!(
                topic = T::TOPIC,
                viewer = %self.viewer,
                delivered,
                filtered,
                "Dispatcher detached"
            ),
        }

        DispatchReport {
            state: self.state,
            delivered,
            filtered,
            error,
        }
    }
}
