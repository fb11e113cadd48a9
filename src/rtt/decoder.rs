//! Incremental UTF-8 decoding of the up-channel byte stream
//!
//! RTT delivers bytes with no regard for character boundaries, so a read can
//! end in the middle of a multi-byte sequence. The decoder holds such a tail
//! back until the next read completes it.

use tracing::trace;

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Stateful UTF-8 decoder for a chunked byte stream
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Undecoded bytes of an incomplete trailing sequence (at most 3)
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` appended to whatever was held back by the previous call.
    ///
    /// Invalid sequences become U+FFFD; an incomplete sequence at the very end
    /// is kept for the next call instead.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // prefix up to valid_up_to() always parses
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());

                    match e.error_len() {
                        Some(invalid) => {
                            trace!("Replacing {} invalid byte(s) in RTT stream", invalid);
                            out.push(REPLACEMENT);
                            rest = &after[invalid..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let held = rest.len();
        let consumed = self.pending.len() - held;
        self.pending.drain(..consumed);
        out
    }

    /// Number of bytes held back waiting for the rest of a character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any held-back partial sequence
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
