//! Blank-line framing of SSE text into event blocks.

use super::buffer::ChunkBuffer;

/// The lines of one SSE event, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventBlock {
    pub lines: Vec<String>,
}

impl EventBlock {
    /// Split raw block text into its lines.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(String::is_empty)
    }
}

/// Incremental framer.
///
/// Buffers raw text and cuts it on `"\n\n"`. Each closed segment is split
/// into lines and handed out as one [`EventBlock`].
#[derive(Debug, Clone)]
pub struct EventFramer {
    buffer: ChunkBuffer,
}

impl Default for EventFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFramer {
    pub fn new() -> Self {
        Self {
            buffer: ChunkBuffer::new("\n\n"),
        }
    }

    /// Feed a chunk of text and return any blocks it closes.
    pub fn feed(&mut self, chunk: &str) -> Vec<EventBlock> {
        self.buffer
            .feed(chunk)
            .iter()
            .map(|text| EventBlock::from_text(text))
            .collect()
    }

    /// At end of input, emit whatever is buffered as one final block.
    pub fn flush(&mut self) -> Option<EventBlock> {
        self.buffer.flush().map(|text| EventBlock::from_text(&text))
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.has_pending()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
