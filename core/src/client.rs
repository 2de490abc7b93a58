use crate::auth::Credentials;
use crate::config::{BackendSettings, TransportKind};
use crate::event::{decode_frame, DecodeStats};
use crate::history::{EmptyHistory, HttpMessageHistory, MessageHistory};
use crate::reconcile::{MessageMutation, TurnReconciler};
use crate::session::{Session, SessionStore};
use crate::transport::{
    BatchTransport, ChannelEvent, ChannelState, EventStreamTransport, ScriptedTransport, Transport,
    TurnRequest,
};
use anyhow::Result;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already streaming for this session")]
    TurnInFlight,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("stream ended after {appended} message(s) without a completion event")]
    Incomplete { appended: usize },
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    /// Messages appended during this turn.
    pub appended: usize,
    /// Total frames dropped by the decoder over the client's lifetime.
    pub dropped_frames: u64,
}

/// Façade over transport, decoder, reconciler and store.
///
/// One client manages one session store. A turn flows through
/// [`ChatClient::send_turn`]: the request goes out over the transport, every
/// inbound frame is decoded, each decoded event is reconciled into a mutation
/// and applied to the store in order, and the turn resolves once a completion
/// event (or a failure) is observed.
#[derive(Clone)]
pub struct ChatClient {
    store: SessionStore,
    transport: Arc<dyn Transport>,
    history: Arc<dyn MessageHistory>,
    decode_stats: DecodeStats,
    sequence: Arc<AtomicU64>,
}

impl ChatClient {
    pub fn new(store: SessionStore, transport: Arc<dyn Transport>) -> Self {
        Self::with_history(store, transport, Arc::new(EmptyHistory))
    }

    pub fn with_history(
        store: SessionStore,
        transport: Arc<dyn Transport>,
        history: Arc<dyn MessageHistory>,
    ) -> Self {
        Self {
            store,
            transport,
            history,
            decode_stats: DecodeStats::new(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a client wired to a real backend per `settings`.
    pub fn from_settings(settings: &BackendSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        let credentials = match &settings.token {
            Some(token) => Credentials::bearer(token.as_str()),
            None => Credentials::anonymous(),
        };
        let transport: Arc<dyn Transport> = match settings.transport {
            TransportKind::Stream => Arc::new(EventStreamTransport::new(
                http.clone(),
                settings.base_url.clone(),
                credentials.clone(),
            )),
            TransportKind::Batch => Arc::new(BatchTransport::new(
                http.clone(),
                settings.base_url.clone(),
                credentials.clone(),
            )),
            TransportKind::Scripted => Arc::new(ScriptedTransport::new(Vec::new())),
        };
        let history = Arc::new(HttpMessageHistory::new(
            http,
            settings.base_url.clone(),
            credentials,
        ));
        Ok(Self::with_history(SessionStore::new(), transport, history))
    }

    /// Client over a scripted transport, for tests and smoke runs.
    pub fn scripted(frames: Vec<String>) -> Self {
        Self::new(SessionStore::new(), Arc::new(ScriptedTransport::new(frames)))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn dropped_frames(&self) -> u64 {
        self.decode_stats.dropped_frames()
    }

    /// Make `session` active and hydrate its prior messages.
    pub async fn initialize_session(&self, session: Session) {
        self.store.initialize(session, self.history.as_ref()).await;
    }

    /// Clear the active session's messages, remotely and locally. Unlike
    /// history loading, a failed remote clear propagates.
    pub async fn clear_session(&self) -> Result<()> {
        let Some(session) = self.store.session() else {
            return Ok(());
        };
        self.history.clear(&session.id).await?;
        self.store.clear();
        Ok(())
    }

    /// Issue one turn and drive it to a terminal outcome.
    ///
    /// Rejects a second turn while one is streaming. Blank content resolves
    /// immediately without touching the transport. On failure, messages
    /// already appended stay in the store.
    pub async fn send_turn(
        &self,
        content: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<TurnSummary, TurnError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Ok(TurnSummary {
                appended: 0,
                dropped_frames: self.decode_stats.dropped_frames(),
            });
        }
        if !self.store.begin_turn() {
            return Err(TurnError::TurnInFlight);
        }

        let mut phase = TurnPhase::Idle;
        advance(&mut phase, TurnPhase::Requesting);
        let request = TurnRequest {
            content,
            session_id: session_id.into(),
        };
        let mut handle = match self.transport.start_turn(request).await {
            Ok(handle) => handle,
            Err(err) => {
                advance(&mut phase, TurnPhase::Failed);
                self.store.end_turn();
                return Err(TurnError::Transport(format!("{err:#}")));
            }
        };

        let mut reconciler = TurnReconciler::new(self.sequence.clone());
        let mut appended = 0usize;
        let mut faulted = false;

        while let Some(event) = handle.next_event().await {
            match event {
                ChannelEvent::Frame(raw) => {
                    advance(&mut phase, TurnPhase::Streaming);
                    for stream_event in decode_frame(&raw, &self.decode_stats) {
                        let mutation = reconciler.apply(stream_event);
                        if matches!(mutation, MessageMutation::Append(_)) {
                            appended += 1;
                        }
                        self.store.apply(mutation);
                        if reconciler.is_terminal() {
                            break;
                        }
                    }
                    if reconciler.is_terminal() {
                        break;
                    }
                }
                ChannelEvent::State(ChannelState::Erroring) => faulted = true,
                ChannelEvent::State(ChannelState::Disconnected) => break,
                ChannelEvent::State(_) => {}
            }
        }
        handle.close();
        self.store.end_turn();

        if reconciler.is_terminal() {
            advance(&mut phase, TurnPhase::Completed);
            Ok(TurnSummary {
                appended,
                dropped_frames: self.decode_stats.dropped_frames(),
            })
        } else {
            advance(&mut phase, TurnPhase::Failed);
            if faulted {
                Err(TurnError::Transport(
                    "channel reported a fault before completion".into(),
                ))
            } else {
                Err(TurnError::Incomplete { appended })
            }
        }
    }
}

fn advance(phase: &mut TurnPhase, next: TurnPhase) {
    if *phase != next {
        tracing::debug!(from = ?*phase, to = ?next, "turn phase changed");
        *phase = next;
    }
}
