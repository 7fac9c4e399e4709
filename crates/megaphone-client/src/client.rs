//! Stream factory
//!
//! `MegaphoneClient` is the public entry point. Every constructor negotiates a
//! channel through a caller-supplied callback, registers the returned stream
//! ids, starts the reader loop when none is running, and hands back a lazy,
//! cancellable sequence of chunks.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::Binding;
use crate::chunk::{Chunk, RawChunk, StreamSpec};
use crate::config::ClientConfig;
use crate::error::{BoxError, ChannelError, Error, Result};
use crate::reader::{ChannelReader, ReaderContext};
use crate::registry::{ContinuationPolicy, SubscriptionId};
use crate::transport::{ChannelTransport, HttpTransport};

pub struct MegaphoneClient {
    ctx: Arc<ReaderContext>,
    /// Serializes negotiation so concurrent callers agree on one channel
    negotiation: Mutex<()>,
}

impl MegaphoneClient {
    /// Client reading from `{base_url}/read/{channel}` over HTTP
    pub fn new(base_url: &str, dedup_capacity: usize) -> Result<Self> {
        let transport = HttpTransport::new(base_url)?;
        Ok(Self::with_transport(transport, dedup_capacity))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::with_transport(transport, config.dedup_capacity))
    }

    pub fn with_transport(transport: impl ChannelTransport + 'static, dedup_capacity: usize) -> Self {
        Self {
            ctx: Arc::new(ReaderContext::new(Arc::new(transport), dedup_capacity)),
            negotiation: Mutex::new(()),
        }
    }

    /// Channel the reader loop is bound to, if one is running
    pub fn active_channel(&self) -> Option<String> {
        self.ctx.state.current()
    }

    /// Number of registered stream ids across all subscriptions
    pub fn active_streams(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Open a stream that stays registered while `policy` returns true.
    ///
    /// `negotiate` receives the channel currently being read (if any) and
    /// returns the channel to use plus the stream ids to subscribe. It runs
    /// before anything is registered, so its failure leaves no state behind.
    pub async fn new_stream<T, F, Fut, E, P>(&self, negotiate: F, policy: P) -> Result<ChunkStream<T>>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<StreamSpec, E>>,
        E: Into<BoxError>,
        P: Fn(&RawChunk) -> bool + Send + Sync + 'static,
    {
        let _negotiating = self.negotiation.lock().await;

        let spec = negotiate(self.ctx.state.current())
            .await
            .map_err(Error::negotiation)?;
        if spec.streams.is_empty() {
            return Err(Error::EmptyStreamSpec);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let policy: ContinuationPolicy = Arc::new(policy);
        let registry = &self.ctx.registry;
        let (binding, subscription) = self
            .ctx
            .state
            .attach(&spec.channel, || registry.register(spec.streams.iter().cloned(), tx, policy))
            .map_err(|active| Error::ChannelConflict {
                active,
                negotiated: spec.channel.clone(),
            })?;

        debug!(
            "{} registered streams {:?} on channel {}",
            subscription, spec.streams, spec.channel
        );
        if binding == Binding::Start {
            info!("Starting channel reader for {}", spec.channel);
            ChannelReader::new(self.ctx.clone(), spec.channel.clone()).spawn();
        }

        let handle = CancelHandle {
            token: CancellationToken::new(),
            subscription,
            stream_ids: spec.streams.into(),
            ctx: Arc::downgrade(&self.ctx),
        };
        Ok(ChunkStream::new(rx, handle))
    }

    /// Continuous subscription, ended only by cancelling it
    pub async fn new_unbounded_stream<T, F, Fut, E>(&self, negotiate: F) -> Result<ChunkStream<T>>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<StreamSpec, E>>,
        E: Into<BoxError>,
    {
        self.new_stream(negotiate, |_: &RawChunk| true).await
    }

    /// One-shot subscription, completed by the first chunk addressed to it
    pub async fn new_delayed_response<T, F, Fut, E>(&self, negotiate: F) -> Result<ChunkStream<T>>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<StreamSpec, E>>,
        E: Into<BoxError>,
    {
        self.new_stream(negotiate, |_: &RawChunk| false).await
    }

    /// Wait for the single response of a delayed-response stream and decode its body
    pub async fn delayed_response<T, F, Fut, E>(&self, negotiate: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<StreamSpec, E>>,
        E: Into<BoxError>,
    {
        let mut stream = self.new_delayed_response::<T, _, _, _>(negotiate).await?;
        match stream.next().await {
            Some(chunk) => Ok(chunk?.body),
            None => Err(Error::MissingResponse),
        }
    }
}

/// Removes the stream ids registered by one constructor call
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    subscription: SubscriptionId,
    stream_ids: Arc<[String]>,
    ctx: Weak<ReaderContext>,
}

impl CancelHandle {
    /// Unsubscribe. Other streams on the same channel are unaffected.
    ///
    /// Does not interrupt an in-flight read; chunks for these stream ids that
    /// arrive afterwards are dropped as unrouted.
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        if let Some(ctx) = self.ctx.upgrade() {
            let removed = ctx.registry.remove_subscription(self.subscription);
            debug!("{} cancelled, removed {} stream ids", self.subscription, removed);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the subscription has been cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn stream_ids(&self) -> &[String] {
        &self.stream_ids
    }
}

/// Lazy sequence of chunks for one subscription.
///
/// Yields an `Err` item for a body that does not decode into `T` and keeps
/// going; a channel failure is yielded once and ends the sequence. Dropping
/// the sequence cancels the subscription.
pub struct ChunkStream<T> {
    rx: UnboundedReceiverStream<std::result::Result<RawChunk, ChannelError>>,
    handle: CancelHandle,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ChunkStream<T> {
    fn new(
        rx: mpsc::UnboundedReceiver<std::result::Result<RawChunk, ChannelError>>,
        handle: CancelHandle,
    ) -> Self {
        Self {
            rx: UnboundedReceiverStream::new(rx),
            handle,
            _payload: PhantomData,
        }
    }

    /// Handle that cancels this subscription from anywhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn stream_ids(&self) -> &[String] {
        self.handle.stream_ids()
    }
}

impl<T: DeserializeOwned> Stream for ChunkStream<T> {
    type Item = Result<Chunk<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_next_unpin(cx).map(|item| {
            item.map(|received| match received {
                Ok(raw) => raw.decode().map_err(Error::from),
                Err(err) => Err(Error::Channel(err)),
            })
        })
    }
}

impl<T> Drop for ChunkStream<T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
