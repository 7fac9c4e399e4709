//! Wire types for chunks delivered over a channel

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One message delivered on a stream.
///
/// Encoded by the broker as a single JSON line: `{"sid", "eid", "ts", "body"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T> {
    #[serde(rename = "sid")]
    pub stream_id: String,
    #[serde(rename = "eid")]
    pub event_id: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub body: T,
}

/// Chunk whose body has not been decoded into a caller type yet
pub type RawChunk = Chunk<serde_json::Value>;

impl RawChunk {
    /// Decode the body into the caller's payload type
    pub fn decode<T: DeserializeOwned>(self) -> serde_json::Result<Chunk<T>> {
        let body = serde_json::from_value(self.body)?;
        Ok(Chunk {
            stream_id: self.stream_id,
            event_id: self.event_id,
            timestamp: self.timestamp,
            body,
        })
    }
}

/// Result of a negotiation callback: the channel to read and the streams to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub channel: String,
    pub streams: Vec<String>,
}

impl StreamSpec {
    pub fn new<I, S>(channel: impl Into<String>, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel: channel.into(),
            streams: streams.into_iter().map(Into::into).collect(),
        }
    }
}
