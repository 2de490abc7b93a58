pub mod auth;
pub mod client;
pub mod config;
pub mod event;
pub mod history;
pub mod reconcile;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use auth::Credentials;
pub use client::{ChatClient, TurnError, TurnPhase, TurnSummary};
pub use config::{BackendSettings, ConfigError, TransportKind};
pub use event::{decode_frame, DecodeStats, StreamEvent};
pub use history::{EmptyHistory, HttpMessageHistory, MessageHistory};
pub use reconcile::{MessageMutation, TurnReconciler};
pub use session::{
    Message, MessageKind, MessagePatch, MessageRole, Session, SessionStore, StoreUpdate,
};
pub use transport::{
    BatchTransport, ChannelEvent, ChannelHandle, ChannelState, EventStreamTransport, Frame,
    ScriptedTransport, Transport, TurnRequest,
};
