//! Incremental UTF-8 decoding of transport chunks.

/// Turns byte chunks into text without splitting characters.
///
/// A multi-byte sequence cut off at the end of a chunk is held back and
/// completed by the next chunk. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `carry + bytes` as forms complete characters.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let owned;
        let input: &[u8] = if self.carry.is_empty() {
            bytes
        } else {
            self.carry.extend_from_slice(bytes);
            owned = std::mem::take(&mut self.carry);
            &owned
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.carry.extend_from_slice(tail);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Decode any held-back bytes at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.carry);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}
