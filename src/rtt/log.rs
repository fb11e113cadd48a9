//! Session log shared between the RTT worker and the control surface

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LogInner {
    text: String,
    /// Bumped on every clear so cursors notice the truncation
    epoch: u64,
}

/// Append-only text log with an explicit clear.
///
/// The worker is the only writer. Appends and clears take the same lock, so a
/// reader never sees half of an appended chunk and an append that happens
/// after a clear is never lost.
#[derive(Debug, Default)]
pub struct LogBuffer {
    inner: Mutex<LogInner>,
}

/// Read position of one consumer of a [`LogBuffer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    epoch: u64,
    offset: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        // A panicked writer cannot leave the String half-appended
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.lock().text.push_str(text);
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.text.clear();
        inner.epoch += 1;
    }

    /// Copy of the whole log
    pub fn snapshot(&self) -> String {
        self.lock().text.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text appended since `cursor` last read, advancing the cursor.
    ///
    /// After a clear the cursor restarts from the beginning of the new log.
    pub fn read_from(&self, cursor: &mut LogCursor) -> String {
        let inner = self.lock();
        if cursor.epoch != inner.epoch || cursor.offset > inner.text.len() {
            cursor.epoch = inner.epoch;
            cursor.offset = 0;
        }
        let new = inner.text[cursor.offset..].to_string();
        cursor.offset = inner.text.len();
        new
    }
}
