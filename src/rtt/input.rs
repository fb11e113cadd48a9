//! Keyboard input queue fed by the control surface

use std::collections::VecDeque;
use std::sync::Mutex;

/// Key that stops the RTT worker instead of being sent to the target
pub const CANCEL_KEY: u8 = 0x1B;

/// FIFO of bytes typed by the operator, drained by the RTT worker
#[derive(Debug, Default)]
pub struct InputQueue {
    bytes: Mutex<VecDeque<u8>>,
}

/// Outcome of draining the queue into the pending write buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// Number of bytes moved
    Bytes(usize),
    /// ESC seen; bytes before it were moved, the rest discarded
    Cancel,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(data.iter().copied());
    }

    pub fn push_char(&self, c: char) {
        let mut buf = [0u8; 4];
        self.push(c.encode_utf8(&mut buf).as_bytes());
    }

    pub fn clear(&self) {
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every queued byte into `pending`, in order, stopping at ESC
    pub(crate) fn drain_into(&self, pending: &mut Vec<u8>) -> Drained {
        let mut bytes = self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match bytes.iter().position(|&b| b == CANCEL_KEY) {
            Some(_) => {
                let before = bytes.drain(..).take_while(|&b| b != CANCEL_KEY);
                pending.extend(before);
                Drained::Cancel
            }
            None => {
                let count = bytes.len();
                pending.extend(bytes.drain(..));
                Drained::Bytes(count)
            }
        }
    }
}
