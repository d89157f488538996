//! Field decoding for SSE event blocks.
//!
//! Each line of a block is read as `key: value`. Only `id`, `event` and
//! `data` are kept; everything else is dropped without complaint. A `data`
//! value is parsed as JSON unless it is the `[DONE]` sentinel, which is
//! consumed silently.

use super::framer::EventBlock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Separator between a field key and its value.
const FIELD_SEPARATOR: &str = ": ";
/// `data` value that carries no payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded SSE event. Absent fields are `None` and are omitted when serialized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl EventRecord {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none()
    }
}

/// A problem absorbed while decoding or streaming.
///
/// None of these end the sequence with an error. They are logged and, when a
/// sink is configured, forwarded to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A `data` value that is neither JSON nor the sentinel.
    MalformedData {
        key: String,
        value: String,
        error: String,
    },
    /// An `id` value that is not an integer.
    MalformedId { value: String, error: String },
    /// The consumer cancelled the stream.
    Cancelled,
    /// The chunk source failed.
    SourceFault(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedData { key, value, error } => {
                write!(f, "malformed {key} payload {value:?}: {error}")
            }
            Self::MalformedId { value, error } => write!(f, "malformed id {value:?}: {error}"),
            Self::Cancelled => write!(f, "stream cancelled"),
            Self::SourceFault(e) => write!(f, "chunk source failed: {e}"),
        }
    }
}

/// Receiving end for [`Diagnostic`]s.
pub type DiagnosticSink = mpsc::UnboundedSender<Diagnostic>;

/// Forward a diagnostic to the sink, if any. A closed sink is ignored.
pub(crate) fn report(sink: Option<&DiagnosticSink>, diagnostic: Diagnostic) {
    if let Some(sink) = sink {
        let _ = sink.send(diagnostic);
    }
}

/// Maps event blocks to [`EventRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    sink: Option<DiagnosticSink>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward diagnostics to `sink`.
    pub fn with_sink(sink: DiagnosticSink) -> Self {
        Self { sink: Some(sink) }
    }

    /// Decode one block. Returns `None` when no recognized field survived.
    pub fn decode(&self, block: &EventBlock) -> Option<EventRecord> {
        let mut record = EventRecord::default();

        for line in &block.lines {
            let Some((key, value)) = line.split_once(FIELD_SEPARATOR) else {
                continue;
            };

            match key {
                "id" => match value.parse::<i64>() {
                    Ok(id) => record.id = Some(id),
                    Err(e) => {
                        tracing::warn!(value, error = %e, "Dropping non-integer SSE id");
                        report(
                            self.sink.as_ref(),
                            Diagnostic::MalformedId {
                                value: value.to_string(),
                                error: e.to_string(),
                            },
                        );
                    }
                },
                "event" => record.event = Some(value.to_string()),
                "data" => {
                    if value == DONE_SENTINEL {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(value) {
                        Ok(data) => record.data = Some(data),
                        Err(e) => {
                            tracing::warn!(key, value, error = %e, "Failed to parse SSE data payload");
                            report(
                                self.sink.as_ref(),
                                Diagnostic::MalformedData {
                                    key: key.to_string(),
                                    value: value.to_string(),
                                    error: e.to_string(),
                                },
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        (!record.is_empty()).then_some(record)
    }
}
