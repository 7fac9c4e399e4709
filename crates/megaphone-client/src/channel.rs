//! Channel binding state
//!
//! At most one reader loop is bound to a channel at a time. The binding is
//! only changed through three entry points:
//! - `attach`: register streams and bind if nothing is bound (start a loop)
//! - `release_if_idle`: unbind after a read cycle that left no streams
//! - `fail`: tear down every stream after a channel error and unbind
//!
//! Each takes the state lock before touching the registry, so a registration
//! can never slip between "registry is empty" and "channel unbound".

use parking_lot::Mutex;
use tracing::info;

use crate::error::ChannelError;
use crate::registry::StreamRegistry;

/// What the caller of `attach` has to do about the reader loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    /// Channel was unbound; the caller must start a reader loop for it
    Start,
    /// A reader loop is already running on this channel
    Join,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    current: Mutex<Option<String>>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }

    /// Run `register` and bind the channel if it was unbound.
    ///
    /// Fails with the active channel id, without running `register`, when a
    /// different channel is already bound.
    pub fn attach<R>(&self, channel_id: &str, register: impl FnOnce() -> R) -> Result<(Binding, R), String> {
        let mut current = self.current.lock();
        match current.as_deref() {
            Some(active) if active != channel_id => Err(active.to_string()),
            Some(_) => Ok((Binding::Join, register())),
            None => {
                let registered = register();
                *current = Some(channel_id.to_string());
                info!("Bound channel {}", channel_id);
                Ok((Binding::Start, registered))
            }
        }
    }

    /// Unbind `channel_id` if no streams remain. Returns whether the loop should exit.
    pub fn release_if_idle(&self, channel_id: &str, registry: &StreamRegistry) -> bool {
        let mut current = self.current.lock();
        if !registry.is_empty() {
            return false;
        }
        if current.as_deref() == Some(channel_id) {
            *current = None;
        }
        info!("No streams left on channel {}, releasing", channel_id);
        true
    }

    /// Fail every registered stream and unbind. Returns the number of subscriptions notified.
    pub fn fail(&self, channel_id: &str, registry: &StreamRegistry, error: &ChannelError) -> usize {
        let mut current = self.current.lock();
        let notified = registry.fail_all(error);
        if current.as_deref() == Some(channel_id) {
            *current = None;
        }
        notified
    }
}
