//! Channel read transport
//!
//! The reader loop only needs "open a read against a channel and hand me the
//! body as it arrives". `HttpTransport` does that against the broker's
//! `GET {base}/read/{channelId}` endpoint; tests plug in scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ChannelError, Error, Result};

/// Incrementally delivered response body of one channel read
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, ChannelError>>;

/// Fetch-like primitive used by the reader loop
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Open one read cycle against a channel.
    ///
    /// The returned body ends normally when the broker closes the read.
    async fn read(&self, channel_id: &str) -> std::result::Result<ByteStream, ChannelError>;
}

/// Streaming HTTP reads against the broker
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Self::with_client(&config.base_url, client)
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// URL of the read endpoint for a channel
    pub fn read_url(&self, channel_id: &str) -> Result<Url> {
        endpoint(&self.base_url, &["read", channel_id])
    }
}

#[async_trait]
impl ChannelTransport for HttpTransport {
    async fn read(&self, channel_id: &str) -> std::result::Result<ByteStream, ChannelError> {
        let url = self
            .read_url(channel_id)
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        debug!("Opening channel read: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status {
                code: status.as_u16(),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|fragment| fragment.map_err(|err| ChannelError::Transport(err.to_string())))
            .boxed())
    }
}

/// Parse a broker base URL, rejecting URLs that cannot carry path segments
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let invalid = || Error::InvalidUrl {
        url: base_url.to_string(),
    };
    let url = Url::parse(base_url.trim_end_matches('/')).map_err(|_| invalid())?;
    if url.cannot_be_a_base() {
        return Err(invalid());
    }
    Ok(url)
}

/// Append percent-encoded path segments to the base URL
pub(crate) fn endpoint(base_url: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidUrl {
            url: base_url.to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_url() {
        let transport = HttpTransport::new("http://localhost:3000/").unwrap();
        let url = transport.read_url("agent.abc123").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/read/agent.abc123");
    }

    #[test]
    fn test_read_url_keeps_base_path() {
        let transport = HttpTransport::new("https://example.com/megaphone").unwrap();
        let url = transport.read_url("c1").unwrap();
        assert_eq!(url.as_str(), "https://example.com/megaphone/read/c1");
    }

    #[test]
    fn test_channel_id_is_escaped() {
        let transport = HttpTransport::new("http://localhost:3000").unwrap();
        let url = transport.read_url("a/b").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/read/a%2Fb");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpTransport::new("mailto:someone@example.com"),
            Err(Error::InvalidUrl { .. })
        ));
    }
}
