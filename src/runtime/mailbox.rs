// src/runtime/mailbox.rs
//! Per-key FIFO job mailboxes
//!
//! A mailbox is a plain queue: no processing logic, no priorities. The
//! [`MailboxManager`] owns the key → mailbox map with lazy creation and
//! explicit teardown.

use crate::runtime::job::{Job, JobId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Opaque serialization key chosen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionKey(String);

impl ExecutionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ExecutionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A job plus its queue identity
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: JobId,
    pub job: Job,
    pub enqueued_at: Instant,
}

impl Envelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: JobId::new(),
            job,
            enqueued_at: Instant::now(),
        }
    }
}

/// FIFO queue of jobs for one key
pub struct ExecutionMailbox {
    key: ExecutionKey,

    queue: Mutex<VecDeque<Envelope>>,

    /// Enqueue counter
    enqueued: AtomicU64,

    /// Dequeue counter
    dequeued: AtomicU64,
}

impl ExecutionMailbox {
    pub fn new(key: ExecutionKey) -> Self {
        Self {
            key,
            queue: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    /// Append a job, returning its id
    pub fn enqueue(&self, job: Job) -> JobId {
        let envelope = Envelope::new(job);
        let id = envelope.id;
        trace!(key = %self.key, job_id = %id, kind = envelope.job.kind().as_str(), "enqueue");

        self.queue.lock().push_back(envelope);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Pop the oldest job
    pub fn dequeue(&self) -> Option<Envelope> {
        let envelope = self.queue.lock().pop_front()?;
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(envelope)
    }

    /// Clone of the oldest job without removing it
    pub fn peek(&self) -> Option<Envelope> {
        self.queue.lock().front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            current_size: self.len(),
        }
    }
}

/// Mailbox counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub current_size: usize,
}

/// Owner of every key's mailbox
#[derive(Default)]
pub struct MailboxManager {
    mailboxes: DashMap<ExecutionKey, Arc<ExecutionMailbox>>,
}

impl MailboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mailbox for `key`, created on first use
    pub fn get_or_create(&self, key: &ExecutionKey) -> Arc<ExecutionMailbox> {
        if let Some(mailbox) = self.mailboxes.get(key) {
            return Arc::clone(mailbox.value());
        }
        self.mailboxes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ExecutionMailbox::new(key.clone())))
            .value()
            .clone()
    }

    pub fn get(&self, key: &ExecutionKey) -> Option<Arc<ExecutionMailbox>> {
        self.mailboxes.get(key).map(|m| Arc::clone(m.value()))
    }

    /// Drop the mailbox for `key`, returning it if it existed
    pub fn remove(&self, key: &ExecutionKey) -> Option<Arc<ExecutionMailbox>> {
        self.mailboxes.remove(key).map(|(_, mailbox)| mailbox)
    }

    pub fn keys(&self) -> Vec<ExecutionKey> {
        self.mailboxes.iter().map(|m| m.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_job(source: &str) -> Job {
        Job::ApplyPatches {
            patches: vec![],
            source: source.to_string(),
        }
    }

    fn source_of(envelope: &Envelope) -> &str {
        match &envelope.job {
            Job::ApplyPatches { source, .. } => source,
            _ => panic!("unexpected job"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mailbox = ExecutionMailbox::new("k".into());
        assert!(mailbox.is_empty());

        mailbox.enqueue(apply_job("first"));
        mailbox.enqueue(apply_job("second"));
        mailbox.enqueue(apply_job("third"));

        assert_eq!(source_of(&mailbox.peek().unwrap()), "first");
        assert_eq!(mailbox.len(), 3);

        let order: Vec<String> = std::iter::from_fn(|| mailbox.dequeue())
            .map(|e| source_of(&e).to_string())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
        assert!(mailbox.dequeue().is_none());
    }

    #[test]
    fn test_stats() {
        let mailbox = ExecutionMailbox::new("k".into());
        mailbox.enqueue(apply_job("a"));
        mailbox.enqueue(apply_job("b"));
        mailbox.dequeue();

        let stats = mailbox.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.current_size, 1);
    }

    #[test]
    fn test_manager_lazy_creation_and_teardown() {
        let manager = MailboxManager::new();
        let key = ExecutionKey::from("world-1");
        assert!(manager.get(&key).is_none());

        let a = manager.get_or_create(&key);
        let b = manager.get_or_create(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);

        assert!(manager.remove(&key).is_some());
        assert!(manager.is_empty());
        assert!(manager.remove(&key).is_none());
    }

    #[test]
    fn test_concurrent_enqueue() {
        use std::thread;

        let mailbox = Arc::new(ExecutionMailbox::new("k".into()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mb = Arc::clone(&mailbox);
                thread::spawn(move || {
                    for j in 0..100 {
                        mb.enqueue(apply_job(&format!("{}-{}", i, j)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(mailbox.len(), 800);
        assert_eq!(mailbox.stats().enqueued, 800);
    }
}
