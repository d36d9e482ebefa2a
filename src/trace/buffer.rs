// src/trace/buffer.rs
//! Bounded lock-free trace buffer
//!
//! Keeps the most recent trace records in memory for compliance checks and
//! export. When full, new records are dropped and counted.

use crate::trace::events::TraceRecord;
use crate::trace::sink::TraceSink;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory trace sink
pub struct TraceBuffer {
    /// Underlying bounded queue
    queue: ArrayQueue<TraceRecord>,

    /// Push counter
    push_count: AtomicU64,

    /// Drop counter (buffer full)
    drop_count: AtomicU64,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            push_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Remove and return every buffered record in emission order
    pub fn drain(&self) -> Vec<TraceRecord> {
        let mut records: Vec<TraceRecord> = std::iter::from_fn(|| self.queue.pop()).collect();
        // Concurrent emitters may push slightly out of sequence
        records.sort_by_key(|r| r.seq);
        records
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

impl TraceSink for TraceBuffer {
    fn record(&self, record: &TraceRecord) {
        match self.queue.push(record.clone()) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.drop_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Buffer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub push_count: u64,
    pub drop_count: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl BufferStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }
}
