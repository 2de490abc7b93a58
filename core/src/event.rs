use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One decoded unit of assistant progress for a turn.
///
/// Mirrors the wire objects the backend emits while working through a turn.
/// Optional wire fields default to empty rather than failing the decode, so a
/// sparse but well-formed event still comes through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Plan {
        #[serde(default)]
        content: String,
    },
    ToolExecution {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        result: Value,
    },
    ToolError {
        #[serde(default)]
        error: String,
    },
    Reflection {
        #[serde(default)]
        content: String,
    },
    Completion {
        #[serde(default)]
        content: String,
    },
}

/// Counter for frames and elements the decoder had to drop.
///
/// Dropped input never fails a turn; the count is the only signal that the
/// stream was lossy.
#[derive(Debug, Clone, Default)]
pub struct DecodeStats {
    dropped: Arc<AtomicU64>,
}

impl DecodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decode one raw frame into zero or more events.
///
/// A JSON array yields one event per element in array order, a single JSON
/// object yields one event, anything else yields nothing. Never errors;
/// unparseable input is counted in `stats` and dropped.
pub fn decode_frame(raw: &str, stats: &DecodeStats) -> Vec<StreamEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            stats.record_drop();
            tracing::warn!(%err, "dropping frame that is not valid JSON");
            return Vec::new();
        }
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| decode_element(item, stats))
            .collect(),
        Value::Object(_) => decode_element(value, stats).into_iter().collect(),
        _ => {
            stats.record_drop();
            Vec::new()
        }
    }
}

fn decode_element(value: Value, stats: &DecodeStats) -> Option<StreamEvent> {
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(err) => {
            stats.record_drop();
            tracing::warn!(%err, "dropping unrecognized stream element");
            None
        }
    }
}
