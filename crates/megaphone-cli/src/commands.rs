//! Subcommand execution

use anyhow::{Context, Result};
use futures::StreamExt;
use megaphone_client::{BrokerClient, MegaphoneClient, StreamSpec};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::args::{SubscribeArgs, WriteArgs};

pub async fn create(broker: &BrokerClient) -> Result<()> {
    let created = broker
        .create_channel()
        .await
        .context("creating channel")?;
    println!("{}", serde_json::to_string(&created)?);
    Ok(())
}

pub async fn write(broker: &BrokerClient, args: WriteArgs) -> Result<()> {
    let body: Value = serde_json::from_str(&args.body).context("message body is not valid JSON")?;
    broker
        .write(&args.channel, &args.stream, &body)
        .await
        .with_context(|| format!("writing to {}/{}", args.channel, args.stream))?;
    Ok(())
}

/// Reuse the requested or currently read channel, otherwise create one
async fn negotiate(
    broker: &BrokerClient,
    args: &SubscribeArgs,
    current: Option<String>,
) -> megaphone_client::Result<StreamSpec> {
    let channel = match args.channel.clone().or(current) {
        Some(channel) => channel,
        None => {
            let created = broker.create_channel().await?;
            info!("Created channel {}", created.channel_id);
            created.channel_id
        }
    };
    Ok(StreamSpec::new(channel, args.streams.iter().cloned()))
}

pub async fn watch(client: &MegaphoneClient, broker: &BrokerClient, args: SubscribeArgs) -> Result<()> {
    let mut chunks = client
        .new_unbounded_stream::<Value, _, _, _>(|current| negotiate(broker, &args, current))
        .await
        .context("subscribing")?;
    info!(
        "Watching {:?} on channel {}",
        chunks.stream_ids(),
        client.active_channel().unwrap_or_default()
    );

    let cancel = chunks.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => println!("{}", serde_json::to_string(&chunk)?),
            Err(err @ megaphone_client::Error::Channel(_)) => {
                return Err(err).context("channel failed");
            }
            Err(err) => warn!("Skipping chunk - {}", err),
        }
    }
    Ok(())
}

pub async fn wait(client: &MegaphoneClient, broker: &BrokerClient, args: SubscribeArgs) -> Result<()> {
    let mut response = client
        .new_delayed_response::<Value, _, _, _>(|current| negotiate(broker, &args, current))
        .await
        .context("subscribing")?;

    let chunk = tokio::select! {
        chunk = response.next() => chunk,
        _ = tokio::signal::ctrl_c() => None,
    };
    match chunk {
        Some(chunk) => {
            let chunk = chunk.context("waiting for response")?;
            println!("{}", json!({ "stream": chunk.stream_id, "body": chunk.body }));
            Ok(())
        }
        None => anyhow::bail!("no response received"),
    }
}
