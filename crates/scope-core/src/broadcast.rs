//! Fan-out of events to live subscribers.
//!
//! Each subscriber owns a bounded outgoing queue. Publishing never waits on
//! a subscriber: a queue that is full gets its subscriber disconnected, a
//! queue whose receiver was dropped gets pruned. Producers and the other
//! subscribers are unaffected either way.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::events::Event;

pub type SubscriberId = u64;

struct Inner {
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Read-only fan-out: it clones events out to subscribers and never touches
/// assignation or state data.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `buffer` bounds each subscriber's outgoing queue.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn buffer(&self) -> usize {
        self.inner.buffer
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.subscribers.lock().await.insert(id, tx);
        debug!(subscriber = id, "subscriber connected");
        Subscription { id, rx }
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    ///
    /// The subscriber map stays locked for the whole fan-out so that every
    /// subscriber observes publishes in the same global order.
    pub async fn publish(&self, event: Event) -> usize {
        let mut subscribers = self.inner.subscribers.lock().await;
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = id,
                        buffer = self.inner.buffer,
                        event = event.kind(),
                        "subscriber buffer full, disconnecting"
                    );
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "subscriber gone");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            subscribers.remove(&id);
        }
        delivered
    }

    /// Drop a subscriber. Its stream ends once the queued events are drained.
    pub async fn disconnect(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.lock().await.remove(&id).is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().await.len()
    }

    pub async fn disconnect_all(&self) {
        self.inner.subscribers.lock().await.clear();
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiving end of one subscription; ends when disconnected.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
