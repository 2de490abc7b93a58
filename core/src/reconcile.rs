use crate::event::StreamEvent;
use crate::session::{Message, MessageKind, MessagePatch};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single store mutation derived from one stream event.
#[derive(Debug, Clone)]
pub enum MessageMutation {
    Append(Message),
    Patch { id: String, patch: MessagePatch },
    Noop,
}

/// Working state for one logical turn.
///
/// Maps each decoded event to the mutation it implies, in event order, and
/// tracks whether the turn has reached its terminal event. The id sequence is
/// shared across turns so fragment ids stay unique within the session; the
/// rest of the state is per-turn and the reconciler is dropped once the turn
/// ends.
#[derive(Debug)]
pub struct TurnReconciler {
    sequence: Arc<AtomicU64>,
    terminal: bool,
}

impl TurnReconciler {
    pub fn new(sequence: Arc<AtomicU64>) -> Self {
        Self {
            sequence,
            terminal: false,
        }
    }

    /// Reconciler with its own id sequence, for standalone use in tests.
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)))
    }

    /// True once a completion event has been applied.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn apply(&mut self, event: StreamEvent) -> MessageMutation {
        match event {
            StreamEvent::Plan { content } => self.append(MessageKind::Plan, content),
            // Reflections are intermediate planning notes; they get their own
            // message rather than being merged into a prior plan.
            StreamEvent::Reflection { content } => self.append(MessageKind::Plan, content),
            StreamEvent::ToolExecution { tool, result, .. } => {
                let rendered =
                    serde_json::to_string(&result).unwrap_or_else(|_| "null".to_string());
                self.append(MessageKind::Tool, format!("Tool: {tool}\nResult: {rendered}"))
            }
            // A tool error is reported but does not end the turn.
            StreamEvent::ToolError { error } => self.append(MessageKind::Error, error),
            StreamEvent::Completion { content } => {
                self.terminal = true;
                self.append(MessageKind::Response, content)
            }
        }
    }

    fn append(&mut self, kind: MessageKind, content: String) -> MessageMutation {
        MessageMutation::Append(Message::assistant(self.fresh_id(kind), kind, content))
    }

    fn fresh_id(&self, kind: MessageKind) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", kind.as_str())
    }
}
