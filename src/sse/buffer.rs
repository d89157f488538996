//! Delimiter-buffered text splitting.
//!
//! Transport chunks arrive at arbitrary boundaries. [`ChunkBuffer`] hides
//! those boundaries: it holds back the trailing fragment that has not yet
//! been closed by its delimiter and only hands out complete units.

/// Accumulates text across `feed` calls and yields delimiter-terminated units.
///
/// Splitting scans left to right over the concatenation of everything fed so
/// far, so the output is the same however the input was partitioned.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    delimiter: &'static str,
    pending: String,
}

impl ChunkBuffer {
    /// Create a buffer that splits on `delimiter`.
    ///
    /// An empty delimiter would never make progress, so it falls back to `"\n"`.
    pub fn new(delimiter: &'static str) -> Self {
        let delimiter = if delimiter.is_empty() { "\n" } else { delimiter };
        Self {
            delimiter,
            pending: String::new(),
        }
    }

    pub fn delimiter(&self) -> &'static str {
        self.delimiter
    }

    /// Append `chunk` and return every unit closed by a delimiter.
    ///
    /// The unterminated remainder (possibly empty) becomes the new pending text.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let delim = self.delimiter.as_bytes();
        // A delimiter can straddle the old tail and the new chunk, but no
        // complete delimiter exists inside the old pending text.
        let scan_from = self.pending.len().saturating_sub(delim.len() - 1);
        self.pending.push_str(chunk);

        let mut units = Vec::new();
        let mut start = 0;
        let mut cursor = scan_from;
        while let Some(pos) = find_bytes(&self.pending.as_bytes()[cursor..], delim) {
            let end = cursor + pos;
            // Delimiters are ASCII, so `start` and `end` sit on char boundaries.
            units.push(self.pending[start..end].to_string());
            start = end + delim.len();
            cursor = start;
        }

        if start > 0 {
            self.pending.drain(..start);
        }
        units
    }

    /// Emit the pending fragment, if any, as a final unit.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Text received but not yet resolved into a complete unit.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits incoming text into complete lines, newline stripped.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    inner: ChunkBuffer,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self {
            inner: ChunkBuffer::new("\n"),
        }
    }

    /// Feed a chunk and return every line it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.inner.feed(chunk)
    }

    /// Emit the unterminated last line at end of input.
    pub fn flush(&mut self) -> Option<String> {
        self.inner.flush()
    }

    pub fn pending(&self) -> &str {
        self.inner.pending()
    }
}
