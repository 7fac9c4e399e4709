//! Channel reader loop
//!
//! Owns the single in-flight read against the bound channel. Each read body
//! is decoded line by line, deduplicated, and routed through the registry in
//! the order the broker wrote it. After a body ends the loop either reopens
//! the read or, with no streams left, releases the channel and exits.
//! Any channel error fails every stream on the channel; there is no retry.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelState;
use crate::chunk::RawChunk;
use crate::codec::LineDecoder;
use crate::dedup::DedupWindow;
use crate::error::ChannelError;
use crate::registry::{Dispatch, StreamRegistry};
use crate::transport::ChannelTransport;

/// State shared between the client and its reader loop
pub(crate) struct ReaderContext {
    pub registry: StreamRegistry,
    pub state: ChannelState,
    pub dedup: Mutex<DedupWindow>,
    pub transport: Arc<dyn ChannelTransport>,
}

impl ReaderContext {
    pub fn new(transport: Arc<dyn ChannelTransport>, dedup_capacity: usize) -> Self {
        Self {
            registry: StreamRegistry::new(),
            state: ChannelState::new(),
            dedup: Mutex::new(DedupWindow::new(dedup_capacity)),
            transport,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Counters for one read cycle, for logging
#[derive(Default)]
struct CycleStats {
    delivered: usize,
    completed: usize,
    duplicates: usize,
    unrouted: usize,
}

pub(crate) struct ChannelReader {
    ctx: Arc<ReaderContext>,
    channel_id: String,
}

impl ChannelReader {
    pub fn new(ctx: Arc<ReaderContext>, channel_id: String) -> Self {
        Self { ctx, channel_id }
    }

    /// Run the loop on its own task.
    ///
    /// A panic inside the loop (a caller's continuation policy, for one) is
    /// turned into a channel failure so the binding is released.
    pub fn spawn(self) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let channel_id = self.channel_id.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
                let err = ChannelError::ReaderAborted(panic_message(panic.as_ref()));
                let notified = ctx.state.fail(&channel_id, &ctx.registry, &err);
                error!(
                    "Channel reader for {} panicked, {} subscriptions closed - {}",
                    channel_id, notified, err
                );
            }
        })
    }

    pub async fn run(self) {
        info!("Channel reader started for {}", self.channel_id);
        let mut cycles = 0usize;
        loop {
            cycles += 1;
            let cycle_start = Instant::now();
            match self.read_cycle().await {
                Ok(stats) => {
                    debug!(
                        "Read cycle {} on {} finished after {:?}: {} delivered, {} completed, {} duplicates, {} unrouted",
                        cycles,
                        self.channel_id,
                        cycle_start.elapsed(),
                        stats.delivered,
                        stats.completed,
                        stats.duplicates,
                        stats.unrouted
                    );
                    if self.ctx.state.release_if_idle(&self.channel_id, &self.ctx.registry) {
                        break;
                    }
                }
                Err(err) => {
                    let notified = self.ctx.state.fail(&self.channel_id, &self.ctx.registry, &err);
                    warn!(
                        "Channel {} failed after {} read cycles, {} subscriptions closed - {}",
                        self.channel_id, cycles, notified, err
                    );
                    break;
                }
            }
        }
        info!("Channel reader stopped for {}", self.channel_id);
    }

    /// Drain one read response
    async fn read_cycle(&self) -> Result<CycleStats, ChannelError> {
        let mut body = self.ctx.transport.read(&self.channel_id).await?;
        let mut decoder = LineDecoder::new();
        let mut stats = CycleStats::default();

        while let Some(fragment) = body.next().await {
            decoder.feed(&fragment?);
            while let Some(chunk) = decoder.next_chunk() {
                self.route(chunk?, &mut stats);
            }
        }
        if let Some(chunk) = decoder.finish()? {
            self.route(chunk, &mut stats);
        }
        Ok(stats)
    }

    fn route(&self, chunk: RawChunk, stats: &mut CycleStats) {
        if !self.ctx.dedup.lock().observe(&chunk.event_id) {
            debug!("Dropping duplicate event {} on stream '{}'", chunk.event_id, chunk.stream_id);
            stats.duplicates += 1;
            return;
        }

        let event_id = chunk.event_id.clone();
        let stream_id = chunk.stream_id.clone();
        match self.ctx.registry.dispatch(chunk) {
            Dispatch::Delivered { completed } => {
                debug!("Event {} delivered on stream '{}'", event_id, stream_id);
                stats.delivered += 1;
                if completed {
                    stats.completed += 1;
                }
            }
            Dispatch::Unrouted => {
                debug!("No subscription for stream '{}', dropping event {}", stream_id, event_id);
                stats.unrouted += 1;
            }
        }
    }
}
