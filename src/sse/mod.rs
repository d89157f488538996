//! Server-Sent Events decoding.
//!
//! Text flows `ChunkBuffer`/`LineSplitter` → `EventFramer` → `EventDecoder`.
//! Every stage is synchronous and owns its own buffer.

mod buffer;
mod decoder;
mod framer;
mod utf8;

pub use buffer::{ChunkBuffer, LineSplitter};
pub use decoder::{DONE_SENTINEL, Diagnostic, DiagnosticSink, EventDecoder, EventRecord};
pub(crate) use decoder::report;
pub use framer::{EventBlock, EventFramer};
pub use utf8::Utf8Decoder;

/// Decode a complete SSE text in one pass.
pub fn decode_all(text: &str) -> Vec<EventRecord> {
    let mut framer = EventFramer::new();
    let decoder = EventDecoder::new();
    let mut blocks = framer.feed(text);
    blocks.extend(framer.flush());
    blocks.iter().filter_map(|b| decoder.decode(b)).collect()
}
