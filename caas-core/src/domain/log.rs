//! Job log types
//!
//! Each job owns a bounded `LogRing`. Producers push records as output
//! chunks arrive; the SSE stream is the destructive consumer (`pop`),
//! while snapshot reads leave the ring untouched.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One log record from job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Ring-local sequence number, strictly increasing.
    pub id: u64,
    /// The output chunk.
    pub log: String,
    /// Unix timestamp in milliseconds, captured at push.
    pub ts: i64,
}

/// Bounded, insertion-ordered log buffer.
///
/// `push` never blocks and never fails; when the ring is full the oldest
/// record is evicted. `pop` removes and returns the oldest record.
#[derive(Debug)]
pub struct LogRing {
    inner: Mutex<RingInner>,
    capacity: usize,
}

#[derive(Debug)]
struct RingInner {
    records: VecDeque<LogRecord>,
    next_seq: u64,
}

impl LogRing {
    /// Creates a ring holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                records: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest if the ring is full.
    pub fn push(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().expect("log ring lock poisoned");
        let record = LogRecord {
            id: inner.next_seq,
            log: text.into(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        inner.next_seq += 1;
        inner.records.push_back(record);
        while inner.records.len() > self.capacity {
            inner.records.pop_front();
        }
    }

    /// Removes and returns the oldest record, or `None` when drained.
    pub fn pop(&self) -> Option<LogRecord> {
        let mut inner = self.inner.lock().expect("log ring lock poisoned");
        inner.records.pop_front()
    }

    /// Returns a copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        let inner = self.inner.lock().expect("log ring lock poisoned");
        inner.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("log ring lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
