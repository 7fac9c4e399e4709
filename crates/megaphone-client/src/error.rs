//! Error types for the megaphone client

use thiserror::Error;

/// Boxed error returned by caller-supplied negotiation callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of the shared channel read.
///
/// Cloned into every subscription multiplexed on the failed channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel read returned HTTP status {code}")]
    Status { code: u16 },
    #[error("channel transport error - {0}")]
    Transport(String),
    #[error("malformed chunk '{line}' - {reason}")]
    MalformedChunk { line: String, reason: String },
    #[error("channel reader aborted - {0}")]
    ReaderAborted(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid url '{url}'")]
    InvalidUrl { url: String },
    #[error("stream negotiation failed - {0}")]
    Negotiation(#[source] BoxError),
    #[error("stream negotiation returned no stream ids")]
    EmptyStreamSpec,
    #[error("negotiated channel '{negotiated}' but channel '{active}' is already being read")]
    ChannelConflict { active: String, negotiated: String },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("chunk body deserialization failed - {0}")]
    Decode(#[from] serde_json::Error),
    #[error("stream completed without a response")]
    MissingResponse,
    #[error("invalid configuration - {0}")]
    Config(String),
    #[error("broker request failed - {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Wrap a negotiation callback failure
    pub fn negotiation(err: impl Into<BoxError>) -> Self {
        Error::Negotiation(err.into())
    }
}
