//! REST helper for the broker's channel endpoints
//!
//! The multiplexer itself only reads. Negotiation callbacks and tooling use
//! this to create channels and push messages into them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;
use crate::transport::{endpoint, parse_base_url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreated {
    pub channel_id: String,
    pub agent_name: String,
}

/// Message addressed to a stream, as sent in a batch write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChanMessage {
    pub stream_id: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteBatchRequest<'a> {
    channel_ids: &'a HashSet<String>,
    messages: &'a [ChanMessage],
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBatchOutcome {
    #[serde(default)]
    pub failures: Vec<MessageDeliveryFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeliveryFailure {
    pub channel: String,
    pub index: usize,
    pub reason: String,
}

pub struct BrokerClient {
    client: reqwest::Client,
    base_url: Url,
}

impl BrokerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// `POST {base}/create`
    pub async fn create_channel(&self) -> Result<ChannelCreated> {
        let url = endpoint(&self.base_url, &["create"])?;
        let response = self.client.post(url).send().await?;
        let created: ChannelCreated = check_status(response).await?.json().await?;
        debug!(
            "Created channel {} on agent {}",
            created.channel_id, created.agent_name
        );
        Ok(created)
    }

    /// `POST {base}/write/{channel}/{stream}`
    pub async fn write(&self, channel_id: &str, stream_id: &str, body: &serde_json::Value) -> Result<()> {
        let url = endpoint(&self.base_url, &["write", channel_id, stream_id])?;
        let response = self.client.post(url).json(body).send().await?;
        check_status(response).await?;
        debug!("Wrote message to {}/{}", channel_id, stream_id);
        Ok(())
    }

    /// `POST {base}/write-batch`
    ///
    /// Per-message delivery failures come back in the outcome, not as an error.
    pub async fn write_batch(
        &self,
        channel_ids: &HashSet<String>,
        messages: &[ChanMessage],
    ) -> Result<WriteBatchOutcome> {
        let url = endpoint(&self.base_url, &["write-batch"])?;
        let request = WriteBatchRequest {
            channel_ids,
            messages,
        };
        let response = self.client.post(url).json(&request).send().await?;
        let outcome: WriteBatchOutcome = check_status(response).await?.json().await?;
        if !outcome.failures.is_empty() {
            warn!("Batch write had {} delivery failures", outcome.failures.len());
        }
        Ok(outcome)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    warn!("Broker request to {} failed with {}", url, status);
    Ok(response.error_for_status()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_created_wire_names() {
        let created: ChannelCreated =
            serde_json::from_str(r#"{"channelId":"a1.xyz","agentName":"a1"}"#).unwrap();
        assert_eq!(created.channel_id, "a1.xyz");
        assert_eq!(created.agent_name, "a1");
    }

    #[test]
    fn test_write_batch_request_shape() {
        let channels: HashSet<String> = ["c1".to_string()].into_iter().collect();
        let messages = vec![ChanMessage {
            stream_id: "new-message".to_string(),
            body: json!({"message": "hi"}),
        }];
        let request = WriteBatchRequest {
            channel_ids: &channels,
            messages: &messages,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "channelIds": ["c1"],
                "messages": [{"streamId": "new-message", "body": {"message": "hi"}}]
            })
        );
    }

    #[test]
    fn test_write_batch_outcome() {
        let outcome: WriteBatchOutcome = serde_json::from_str(
            r#"{"failures":[{"channel":"c2","index":0,"reason":"channel not found"}]}"#,
        )
        .unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel, "c2");
    }
}
