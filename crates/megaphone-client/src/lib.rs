//! Megaphone client - stream multiplexing over a single broker channel
//!
//! One long-lived read against the broker carries many logical streams.
//! Each stream gets its own subscriber and its own completion policy:
//! - Unbounded streams stay open until the caller cancels them
//! - Delayed responses complete after their first chunk
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use megaphone_client::{BrokerClient, MegaphoneClient, StreamSpec};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct ChatMessage {
//!     message: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> megaphone_client::Result<()> {
//!     let client = MegaphoneClient::new("http://localhost:3000", 1024)?;
//!     let broker = BrokerClient::new("http://localhost:3000")?;
//!
//!     let mut messages = client
//!         .new_unbounded_stream::<ChatMessage, _, _, _>(|channel| async move {
//!             let channel = match channel {
//!                 Some(channel) => channel,
//!                 None => broker.create_channel().await?.channel_id,
//!             };
//!             Ok::<_, megaphone_client::Error>(StreamSpec::new(channel, ["new-message"]))
//!         })
//!         .await?;
//!
//!     while let Some(chunk) = messages.next().await {
//!         println!("{}", chunk?.body.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod broker;
mod channel;
pub mod chunk;
mod client;
pub mod codec;
pub mod config;
pub mod dedup;
mod error;
mod reader;
pub mod registry;
pub mod transport;

pub use broker::{BrokerClient, ChanMessage, ChannelCreated, MessageDeliveryFailure, WriteBatchOutcome};
pub use chunk::{Chunk, RawChunk, StreamSpec};
pub use client::{CancelHandle, ChunkStream, MegaphoneClient};
pub use config::ClientConfig;
pub use error::{BoxError, ChannelError, Error, Result};
pub use registry::{ContinuationPolicy, SubscriptionId};
pub use transport::{ByteStream, ChannelTransport, HttpTransport};
