use crate::auth::Credentials;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use url::Url;

/// Connection state of a channel, owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Erroring,
}

/// One raw unit of data from the transport, prior to decoding. Malformed
/// payloads pass through here untouched; decoding failures are the decoder's
/// concern.
pub type Frame = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(Frame),
    State(ChannelState),
}

/// A turn request ready to go over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnRequest {
    pub content: String,
    pub session_id: String,
}

/// Receiving end of an open channel for one turn.
///
/// Events arrive exactly once, in arrival order. Dropping or closing the
/// handle stops delivery and tears down the reader task.
pub struct ChannelHandle {
    events: UnboundedReceiver<ChannelEvent>,
    outbound: Option<UnboundedSender<Value>>,
    abort: Option<AbortHandle>,
}

impl ChannelHandle {
    /// Handle over a bare event receiver: no outbound side, no reader task.
    /// Lets transports outside this crate satisfy the [`Transport`] contract.
    pub fn from_events(events: UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            events,
            outbound: None,
            abort: None,
        }
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Send an arbitrary payload back over the channel. Only duplex-capable
    /// transports support this.
    pub fn send(&self, payload: Value) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| anyhow!("transport is not duplex-capable"))?;
        outbound
            .send(payload)
            .map_err(|_| anyhow!("channel is closed"))
    }

    pub fn close(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.events.close();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// A way of issuing one turn and receiving its frames.
///
/// Implementations forward every inbound frame exactly once, in arrival
/// order, without buffering or decoding, and report state transitions around
/// them. None of them retry; retry policy belongs to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_turn(&self, request: TurnRequest) -> Result<ChannelHandle>;
}

fn report_fault(tx: &UnboundedSender<ChannelEvent>) {
    let _ = tx.send(ChannelEvent::State(ChannelState::Erroring));
    let _ = tx.send(ChannelEvent::State(ChannelState::Disconnected));
}

/// Request/response transport: one POST, whose body (a single event object or
/// an array of them) is replayed as a single raw frame.
pub struct BatchTransport {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl BatchTransport {
    pub fn new(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }
}

#[async_trait]
impl Transport for BatchTransport {
    async fn start_turn(&self, request: TurnRequest) -> Result<ChannelHandle> {
        let url = self
            .base_url
            .join("api/v1/chat/send")
            .context("invalid chat send endpoint")?;
        let http = self.http.clone();
        let credentials = self.credentials.clone();
        let (tx, rx) = unbounded_channel();

        let task = tokio::spawn(async move {
            let _ = tx.send(ChannelEvent::State(ChannelState::Connecting));
            let outcome = async {
                let response = credentials
                    .authorize(http.post(url).json(&request))
                    .send()
                    .await?
                    .error_for_status()?;
                response.text().await
            }
            .await;
            match outcome {
                Ok(body) => {
                    let _ = tx.send(ChannelEvent::State(ChannelState::Connected));
                    let _ = tx.send(ChannelEvent::Frame(body));
                    let _ = tx.send(ChannelEvent::State(ChannelState::Disconnected));
                }
                Err(err) => {
                    tracing::error!(%err, "chat send request failed");
                    report_fault(&tx);
                }
            }
        });

        Ok(ChannelHandle {
            events: rx,
            outbound: None,
            abort: Some(task.abort_handle()),
        })
    }
}

/// Server-push transport: a persistent `text/event-stream` connection keyed
/// by session id carries the frames, one JSON event per `data:` line, while
/// the turn itself is issued with a POST whose response body is ignored.
pub struct EventStreamTransport {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl EventStreamTransport {
    pub fn new(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }
}

#[async_trait]
impl Transport for EventStreamTransport {
    async fn start_turn(&self, request: TurnRequest) -> Result<ChannelHandle> {
        let stream_url = self
            .base_url
            .join(&format!("api/v1/chat/stream/{}", request.session_id))
            .context("invalid chat stream endpoint")?;
        let send_url = self
            .base_url
            .join("api/v1/chat/send")
            .context("invalid chat send endpoint")?;
        let http = self.http.clone();
        let credentials = self.credentials.clone();
        let (tx, rx) = unbounded_channel();

        let task = tokio::spawn(async move {
            run_push_turn(http, credentials, stream_url, send_url, request, tx).await;
        });

        Ok(ChannelHandle {
            events: rx,
            outbound: None,
            abort: Some(task.abort_handle()),
        })
    }
}

async fn run_push_turn(
    http: reqwest::Client,
    credentials: Credentials,
    stream_url: Url,
    send_url: Url,
    request: TurnRequest,
    tx: UnboundedSender<ChannelEvent>,
) {
    let _ = tx.send(ChannelEvent::State(ChannelState::Connecting));

    // Open the push stream before issuing the turn so no frame can slip past.
    let response = match credentials
        .authorize(http.get(stream_url))
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(%err, "event stream connect failed");
            report_fault(&tx);
            return;
        }
    };
    let _ = tx.send(ChannelEvent::State(ChannelState::Connected));

    if let Err(err) = credentials
        .authorize(http.post(send_url).json(&request))
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        tracing::error!(%err, "turn request failed");
        report_fault(&tx);
        return;
    }

    let mut body = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, "event stream read failed");
                report_fault(&tx);
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));
        while let Some(split) = buffer.find('\n') {
            let line: String = buffer.drain(..=split).collect();
            if let Some(frame) = event_stream_data(&line) {
                if tx.send(ChannelEvent::Frame(frame.to_owned())).is_err() {
                    return;
                }
            }
        }
    }
    let _ = tx.send(ChannelEvent::State(ChannelState::Disconnected));
}

/// Extract the payload of a `data:` line; other stream fields and blank
/// keep-alive lines carry no frame.
fn event_stream_data(line: &str) -> Option<&str> {
    let payload = line.trim_end().strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    (!payload.is_empty()).then_some(payload)
}

/// Transport that replays a fixed frame script, letting tests and the smoke
/// task drive the full turn pipeline without a backend.
///
/// This is also the duplex-capable variant; outbound payloads are recorded
/// for inspection.
pub struct ScriptedTransport {
    frames: Vec<Frame>,
    clean_disconnect: bool,
    requests: Arc<RwLock<Vec<TurnRequest>>>,
    sent: Arc<RwLock<Vec<Value>>>,
}

impl ScriptedTransport {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            clean_disconnect: true,
            requests: Arc::default(),
            sent: Arc::default(),
        }
    }

    /// Script that ends with a transport fault instead of a clean close.
    pub fn faulty(frames: Vec<Frame>) -> Self {
        Self {
            clean_disconnect: false,
            ..Self::new(frames)
        }
    }

    /// Turn requests received so far, in order.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.read().clone()
    }

    /// Payloads pushed back over the duplex channel so far.
    pub fn sent_payloads(&self) -> Vec<Value> {
        self.sent.read().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start_turn(&self, request: TurnRequest) -> Result<ChannelHandle> {
        self.requests.write().push(request);

        let (tx, rx) = unbounded_channel();
        let _ = tx.send(ChannelEvent::State(ChannelState::Connecting));
        let _ = tx.send(ChannelEvent::State(ChannelState::Connected));
        for frame in &self.frames {
            let _ = tx.send(ChannelEvent::Frame(frame.clone()));
        }
        if self.clean_disconnect {
            let _ = tx.send(ChannelEvent::State(ChannelState::Disconnected));
        } else {
            report_fault(&tx);
        }

        let (outbound_tx, mut outbound_rx) = unbounded_channel();
        let sent = self.sent.clone();
        let task = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                sent.write().push(payload);
            }
        });

        Ok(ChannelHandle {
            events: rx,
            outbound: Some(outbound_tx),
            abort: Some(task.abort_handle()),
        })
    }
}
