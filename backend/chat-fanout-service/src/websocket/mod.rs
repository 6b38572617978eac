use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use uuid::Uuid;

pub mod bridge;
pub mod dispatcher;
pub mod gateway;
pub mod session;
pub mod sink;

/// Unique identifier for one attached multicast consumer
///
/// Each dispatcher gets its own subscriber ID when it attaches, so detaching
/// never touches another consumer's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of pushing one message into a [`Multicast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub delivered: usize,
    /// Consumers whose queue was full; the message was dropped for them only.
    pub dropped: usize,
    /// Consumers found closed and removed.
    pub pruned: usize,
}

/// Hot multicast stream with no history.
///
/// Every attached consumer owns a bounded queue. `push` never waits: a full
/// queue drops the new message for that consumer, a closed queue is pruned.
pub struct Multicast<T> {
    topic: String,
    capacity: usize,
    inner: Arc<RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<T>>>>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            capacity: self.capacity,
            inner: Arc::clone(&self.inner),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T: Send + Sync + 'static> Multicast<T> {
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            capacity: capacity.max(1),
            inner: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a new consumer. It observes only messages pushed after this
    /// call returns. Attaching to a closed multicast yields a subscription
    /// that ends immediately.
    pub async fn attach(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        if self.is_closed() {
            return Subscription { id, rx };
        }
        guard.insert(id, tx);

        tracing::debug!(
            topic = %self.topic,
            subscriber = ?id,
            total = guard.len(),
            "Attached multicast subscriber"
        );

        Subscription { id, rx }
    }

    pub async fn detach(&self, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        if guard.remove(&id).is_some() {
            tracing::debug!(
                topic = %self.topic,
                subscriber = ?id,
                remaining = guard.len(),
                "Detached multicast subscriber"
            );
        }
    }

    /// Offer `msg` to every attached consumer without waiting on any of them.
    pub async fn push(&self, msg: T) -> PushOutcome {
        let msg = Arc::new(msg);
        let mut outcome = PushOutcome::default();

        let mut guard = self.inner.write().await;
        guard.retain(|id, sender| match sender.try_send(Arc::clone(&msg)) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(topic = %self.topic, subscriber = ?id, "Consumer queue full, dropping message");
                outcome.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                outcome.pruned += 1;
                false
            }
        });

        if outcome.pruned > 0 {
            tracing::debug!(
                topic = %self.topic,
                pruned = outcome.pruned,
                active = guard.len(),
                "Pruned closed multicast subscribers"
            );
        }

        outcome
    }

    /// Drop every consumer queue; attached subscriptions then end.
    pub async fn close(&self) {
        let mut guard = self.inner.write().await;
        self.closed.store(true, Ordering::SeqCst);
        guard.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// One consumer's handle on a [`Multicast`].
pub struct Subscription<T> {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, or `None` once the multicast has closed.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.rx.recv().await
    }
}
