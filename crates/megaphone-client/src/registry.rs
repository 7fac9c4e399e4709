//! Stream registry
//!
//! Maps stream ids to the subscription that receives their chunks. Shared by
//! the reader loop (dispatch, completion) and the client (register, cancel).
//! Registration, removal, and delivery each happen under a single lock, so
//! dispatch never observes a half-removed subscription.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chunk::RawChunk;
use crate::error::ChannelError;

/// Predicate deciding whether a subscription stays registered after a chunk.
///
/// Called on the reader task without the registry lock held.
pub type ContinuationPolicy = Arc<dyn Fn(&RawChunk) -> bool + Send + Sync>;

/// Receiving side of a subscription. Dropping every clone completes it.
pub type ChunkSink = mpsc::UnboundedSender<std::result::Result<RawChunk, ChannelError>>;

/// Identifies the group of stream ids registered by one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    sink: ChunkSink,
    policy: ContinuationPolicy,
}

impl Subscription {
    /// Evaluate the continuation policy for a chunk
    pub fn continues_after(&self, chunk: &RawChunk) -> bool {
        (self.policy)(chunk)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.sink.is_closed())
            .finish_non_exhaustive()
    }
}

/// Outcome of routing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to a subscription; `completed` if it was removed afterwards
    Delivered { completed: bool },
    /// No subscription registered for the chunk's stream id
    Unrouted,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Subscription>,
    next_id: u64,
}

impl Inner {
    fn remove_subscription(&mut self, id: SubscriptionId) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, sub| sub.id != id);
        before - self.streams.len()
    }
}

#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<Inner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register stream ids as one subscription sharing a sink and policy.
    ///
    /// Stream ids must be unique among active entries. A duplicate replaces
    /// the previous entry for that id.
    pub fn register<I, S>(&self, stream_ids: I, sink: ChunkSink, policy: ContinuationPolicy) -> SubscriptionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        for stream_id in stream_ids {
            let stream_id = stream_id.into();
            let subscription = Subscription {
                id,
                sink: sink.clone(),
                policy: policy.clone(),
            };
            if let Some(previous) = inner.streams.insert(stream_id.clone(), subscription) {
                warn!(
                    "Stream '{}' re-registered by {} while held by {}",
                    stream_id, id, previous.id
                );
            }
        }
        debug!("Registered {} ({} active streams)", id, inner.streams.len());
        id
    }

    pub fn lookup(&self, stream_id: &str) -> Option<Subscription> {
        self.inner.lock().streams.get(stream_id).cloned()
    }

    /// Deliver a chunk to its subscription and apply the continuation policy.
    ///
    /// When the policy ends the subscription, every stream id registered with
    /// it is removed, which completes the caller's sequence. The policy runs
    /// without the registry lock held; delivery and removal happen under one
    /// lock, and only if the subscription is still registered by then.
    pub fn dispatch(&self, chunk: RawChunk) -> Dispatch {
        let Some(subscription) = self.lookup(&chunk.stream_id) else {
            return Dispatch::Unrouted;
        };
        let keep = subscription.continues_after(&chunk);

        let mut inner = self.inner.lock();
        let still_registered = inner
            .streams
            .get(&chunk.stream_id)
            .is_some_and(|current| current.id == subscription.id);
        if !still_registered {
            debug!("{} removed while evaluating its policy, dropping chunk", subscription.id);
            return Dispatch::Unrouted;
        }

        let stream_id = chunk.stream_id.clone();
        if subscription.sink.send(Ok(chunk)).is_err() {
            debug!("Receiver for {} dropped, removing", subscription.id);
            inner.remove_subscription(subscription.id);
            return Dispatch::Delivered { completed: true };
        }

        if keep {
            return Dispatch::Delivered { completed: false };
        }
        let removed = inner.remove_subscription(subscription.id);
        debug!(
            "{} completed on stream '{}', removed {} stream ids",
            subscription.id, stream_id, removed
        );
        Dispatch::Delivered { completed: true }
    }

    /// Remove every stream id belonging to a subscription
    pub fn remove_subscription(&self, id: SubscriptionId) -> usize {
        self.inner.lock().remove_subscription(id)
    }

    pub fn remove_ids(&self, stream_ids: &[String]) -> usize {
        let mut inner = self.inner.lock();
        stream_ids
            .iter()
            .filter(|stream_id| inner.streams.remove(stream_id.as_str()).is_some())
            .count()
    }

    pub fn remove_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&str, &Subscription) -> bool,
    {
        let mut inner = self.inner.lock();
        let before = inner.streams.len();
        inner.streams.retain(|stream_id, sub| !predicate(stream_id, sub));
        before - inner.streams.len()
    }

    /// Send a terminal error to every subscription once and clear the registry.
    ///
    /// Returns the number of subscriptions notified.
    pub fn fail_all(&self, error: &ChannelError) -> usize {
        let mut inner = self.inner.lock();
        let mut notified = HashSet::new();
        for subscription in inner.streams.values() {
            if notified.insert(subscription.id) {
                // Receiver may already be gone; nothing left to notify then
                let _ = subscription.sink.send(Err(error.clone()));
            }
        }
        inner.streams.clear();
        notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().streams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }
}
