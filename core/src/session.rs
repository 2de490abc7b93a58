use crate::history::MessageHistory;
use crate::reconcile::MessageMutation;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Assistant-side sub-classification of a message fragment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Plan,
    Tool,
    Response,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Tool => "tool",
            Self::Response => "response",
            Self::Error => "error",
        }
    }
}

/// One conversational turn fragment.
///
/// `id` is assigned client-side when the fragment materializes and never
/// changes afterwards; later events may only patch `content` and `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn assistant(id: impl Into<String>, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            kind: Some(kind),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::User,
            kind: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-place update for an existing message. Absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub kind: Option<MessageKind>,
    pub content: Option<String>,
}

/// A named conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub name: String,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Notification published to subscribers on every store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    Appended { id: String },
    Patched { id: String },
    Replaced,
    Streaming(bool),
}

/// Authoritative in-memory message list for the active session.
///
/// Mutations happen through the methods below and each one publishes a
/// [`StoreUpdate`] to subscribers; nothing else shares a reference to the
/// underlying list.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<InnerStore>>,
}

#[derive(Default)]
struct InnerStore {
    session: Option<Session>,
    messages: Vec<Message>,
    is_streaming: bool,
    subscribers: Vec<UnboundedSender<StoreUpdate>>,
}

impl InnerStore {
    fn publish(&mut self, update: StoreUpdate) {
        self.subscribers
            .retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. The receiver sees every mutation from this point
    /// on, in application order.
    pub fn subscribe(&self) -> UnboundedReceiver<StoreUpdate> {
        let (tx, rx) = unbounded_channel();
        self.inner.write().subscribers.push(tx);
        rx
    }

    pub fn add_message(&self, message: Message) {
        let mut inner = self.inner.write();
        let id = message.id.clone();
        inner.messages.push(message);
        inner.publish(StoreUpdate::Appended { id });
    }

    /// Patch `content`/`kind` of an existing message in place. A missing id is
    /// a no-op.
    pub fn patch_message(&self, id: &str, patch: MessagePatch) {
        let mut inner = self.inner.write();
        let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        if let Some(kind) = patch.kind {
            message.kind = Some(kind);
        }
        if let Some(content) = patch.content {
            message.content = content;
        }
        inner.publish(StoreUpdate::Patched { id: id.to_owned() });
    }

    pub fn apply(&self, mutation: MessageMutation) {
        match mutation {
            MessageMutation::Append(message) => self.add_message(message),
            MessageMutation::Patch { id, patch } => self.patch_message(&id, patch),
            MessageMutation::Noop => {}
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.messages.clear();
        inner.publish(StoreUpdate::Replaced);
    }

    /// Make `session` the active session and replace the message list with its
    /// prior history. A failed history fetch degrades to an empty list.
    pub async fn initialize(&self, session: Session, history: &dyn MessageHistory) {
        let messages = match history.fetch(&session.id).await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(%err, session = %session.id, "failed to load session history");
                Vec::new()
            }
        };
        let mut inner = self.inner.write();
        inner.session = Some(session);
        inner.messages = messages;
        inner.publish(StoreUpdate::Replaced);
    }

    /// Drop all session state: messages, streaming flag and session identity.
    pub fn cleanup(&self) {
        let mut inner = self.inner.write();
        inner.session = None;
        inner.messages.clear();
        inner.is_streaming = false;
        inner.publish(StoreUpdate::Replaced);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().messages.clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.read().session.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.read().is_streaming
    }

    /// Flip `is_streaming` on for a new turn. Returns false, leaving the flag
    /// untouched, when a turn is already in flight.
    pub fn begin_turn(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.is_streaming {
            return false;
        }
        inner.is_streaming = true;
        inner.publish(StoreUpdate::Streaming(true));
        true
    }

    pub fn end_turn(&self) {
        let mut inner = self.inner.write();
        if inner.is_streaming {
            inner.is_streaming = false;
            inner.publish(StoreUpdate::Streaming(false));
        }
    }
}
