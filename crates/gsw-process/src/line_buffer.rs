//! Thread-safe append-and-read-by-line byte buffer.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Consumed-prefix size at which the buffer is compacted.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 4 * 1024;

/// A contiguous byte buffer with a read cursor.
///
/// The pipe reader appends raw chunks; the log pump takes one line at a
/// time. Consumed bytes stay in place until the cursor crosses the
/// compaction threshold, at which point the prefix is dropped in one move.
/// This keeps `read_line` amortised O(1): compacting on every read would
/// copy the unread tail each time, and compacting on the append path would
/// stall the producer.
pub struct LineBuffer {
    inner: Mutex<Inner>,
    threshold: usize,
}

struct Inner {
    data: Vec<u8>,
    cursor: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_COMPACTION_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: Vec::new(),
                cursor: 0,
            }),
            threshold,
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Concatenate `bytes` to the tail. Never compacts.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.locked().data.extend_from_slice(bytes);
    }

    /// Take the next complete line, including its terminating newline.
    ///
    /// `None` when no complete line is buffered; a trailing partial line
    /// stays in place until its newline arrives or [`read_all`] drains it.
    ///
    /// [`read_all`]: LineBuffer::read_all
    pub fn read_line(&self) -> Option<String> {
        let mut inner = self.locked();
        let offset = inner.data[inner.cursor..]
            .iter()
            .position(|&b| b == b'\n')?;
        let end = inner.cursor + offset + 1;
        let line = String::from_utf8_lossy(&inner.data[inner.cursor..end]).into_owned();
        inner.cursor = end;
        if inner.cursor >= self.threshold {
            let cursor = inner.cursor;
            inner.data.drain(..cursor);
            inner.cursor = 0;
        }
        Some(line)
    }

    /// Take everything not yet consumed and reset the buffer to empty.
    pub fn read_all(&self) -> String {
        let mut inner = self.locked();
        let rest = String::from_utf8_lossy(&inner.data[inner.cursor..]).into_owned();
        inner.data.clear();
        inner.cursor = 0;
        rest
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        let inner = self.locked();
        inner.data.len() - inner.cursor
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
