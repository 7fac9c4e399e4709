//! Scripted broker for driving the client without a network

#![allow(dead_code)]

use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use megaphone_client::{ByteStream, ChannelError, ChannelTransport, Error, StreamSpec};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(2);

/// One scripted response to a channel read
pub enum Read {
    /// Body delivered as these fragments, then closed normally
    Body(Vec<String>),
    /// Body fragments followed by a transport failure
    BodyThenFail(Vec<String>, ChannelError),
    /// The read itself fails
    Fail(ChannelError),
}

pub struct ScriptedTransport {
    reads: tokio::sync::Mutex<mpsc::UnboundedReceiver<Read>>,
    opened: Arc<Mutex<Vec<String>>>,
}

/// Test-side control of a `ScriptedTransport`
#[derive(Clone)]
pub struct Script {
    tx: mpsc::UnboundedSender<Read>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            reads: tokio::sync::Mutex::new(rx),
            opened: opened.clone(),
        };
        (transport, Script { tx, opened })
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn read(&self, channel_id: &str) -> Result<ByteStream, ChannelError> {
        self.opened.lock().unwrap().push(channel_id.to_string());
        let next = self.reads.lock().await.recv().await;
        match next {
            Some(Read::Body(fragments)) => Ok(fragment_stream(fragments, None).boxed()),
            Some(Read::BodyThenFail(fragments, err)) => {
                Ok(fragment_stream(fragments, Some(err)).boxed())
            }
            Some(Read::Fail(err)) => Err(err),
            // Script dropped: hold the read open like an idle long poll
            None => futures::future::pending().await,
        }
    }
}

fn fragment_stream(
    fragments: Vec<String>,
    failure: Option<ChannelError>,
) -> impl Stream<Item = Result<Bytes, ChannelError>> + Send + 'static {
    let items: Vec<Result<Bytes, ChannelError>> = fragments
        .into_iter()
        .map(|fragment| Ok(Bytes::from(fragment)))
        .chain(failure.map(Err))
        .collect();
    futures::stream::iter(items)
}

impl Script {
    pub fn push(&self, read: Read) {
        self.tx.send(read).expect("transport dropped");
    }

    /// Push one body holding these lines
    pub fn body(&self, lines: &[String]) {
        self.push(Read::Body(vec![lines.concat()]));
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

/// One NDJSON line as written by the broker
pub fn line(stream_id: &str, event_id: &str) -> String {
    line_with_body(stream_id, event_id, serde_json::json!({ "event": event_id }))
}

pub fn line_with_body(stream_id: &str, event_id: &str, body: serde_json::Value) -> String {
    let chunk = serde_json::json!({
        "sid": stream_id,
        "eid": event_id,
        "ts": "2024-03-01T12:30:00Z",
        "body": body,
    });
    format!("{chunk}\n")
}

/// Negotiation callback factory: joins the current channel or creates `chan-N`
#[derive(Clone, Default)]
pub struct Negotiator {
    seen: Arc<Mutex<Vec<Option<String>>>>,
    created: Arc<AtomicUsize>,
}

impl Negotiator {
    pub fn streams(
        &self,
        streams: &[&str],
    ) -> impl FnOnce(Option<String>) -> Ready<Result<StreamSpec, Error>> {
        let this = self.clone();
        let streams: Vec<String> = streams.iter().map(|s| s.to_string()).collect();
        move |current| {
            this.seen.lock().unwrap().push(current.clone());
            let channel = current.unwrap_or_else(|| {
                format!("chan-{}", this.created.fetch_add(1, Ordering::SeqCst) + 1)
            });
            ready(Ok(StreamSpec::new(channel, streams)))
        }
    }

    /// Callback that always answers with a fixed channel
    pub fn fixed(
        &self,
        channel: &str,
        streams: &[&str],
    ) -> impl FnOnce(Option<String>) -> Ready<Result<StreamSpec, Error>> {
        let this = self.clone();
        let spec = StreamSpec::new(channel, streams.iter().copied());
        move |current| {
            this.seen.lock().unwrap().push(current);
            ready(Ok(spec))
        }
    }

    /// Current channel ids handed to each negotiation, in call order
    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

/// Next item from a stream, failing the test if nothing arrives in time
pub async fn recv<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    tokio::time::timeout(TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for stream item")
}

/// Poll a condition until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
