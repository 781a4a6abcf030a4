//! Bounded per-sink FIFO

use crate::core::sink::SinkRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// Queue length after the push
    pub len: usize,
    /// Oldest records evicted to stay within the bound
    pub evicted: usize,
}

/// Concurrency-safe FIFO of pending records.
///
/// When `max_len` is non-zero the queue never holds more than `max_len`
/// records; overflow evicts from the head (oldest first).
#[derive(Debug)]
pub struct SinkQueue {
    records: Mutex<VecDeque<SinkRecord>>,
    max_len: usize,
}

impl SinkQueue {
    /// Create a queue; `max_len == 0` means unbounded
    pub fn new(max_len: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Append at the tail
    pub fn push(&self, record: SinkRecord) -> PushOutcome {
        let mut records = self.records.lock();
        records.push_back(record);
        let evicted = self.trim(&mut records);
        PushOutcome {
            len: records.len(),
            evicted,
        }
    }

    /// Take up to `max` records from the head, in FIFO order
    pub fn pop_batch(&self, max: usize) -> Vec<SinkRecord> {
        let mut records = self.records.lock();
        let n = max.min(records.len());
        records.drain(..n).collect()
    }

    /// Put a batch back at the head, keeping its original order.
    ///
    /// Returns how many records were evicted to respect the bound.
    pub fn requeue_front(&self, batch: Vec<SinkRecord>) -> usize {
        let mut records = self.records.lock();
        for record in batch.into_iter().rev() {
            records.push_front(record);
        }
        self.trim(&mut records)
    }

    /// Remove everything still pending
    pub fn drain_all(&self) -> Vec<SinkRecord> {
        self.records.lock().drain(..).collect()
    }

    fn trim(&self, records: &mut VecDeque<SinkRecord>) -> usize {
        if self.max_len == 0 || records.len() <= self.max_len {
            return 0;
        }
        let excess = records.len() - self.max_len;
        records.drain(..excess);
        excess
    }
}
