// src/runtime/runner.rs
//! Single-writer drain loop per execution key
//!
//! # States
//!
//! ```text
//!            kick (mailbox non-empty, turn free)
//!   idle ─────────────────────────────────────────► draining
//!    ▲                                                 │
//!    │  recheck: mailbox empty → release turn          │ dequeue / process
//!    └─────────────────────────────────────────────────┤
//!                  recheck: mailbox non-empty → keep turn, loop
//! ```
//!
//! A key's [`DrainTurn`] is held for the whole drain. When the loop sees an
//! empty mailbox it rechecks the queue under the turn before releasing it.
//! A job whose kick was rejected while the drain was running is picked up
//! by that recheck; a job enqueued after the release wins its own kick.
//!
//! Drains for different keys run as independent tokio tasks.

use crate::observability::metric_names;
use crate::runtime::job::{JobId, JobKind, JobOutcome};
use crate::runtime::mailbox::{Envelope, ExecutionKey, ExecutionMailbox, MailboxManager};
use crate::trace::{TraceEvent, Tracer};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Executes dequeued jobs on behalf of the runner
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run one job to completion
    async fn process(&self, key: &ExecutionKey, envelope: Envelope) -> JobOutcome;

    /// A job panicked; the processor must stop trusting the key's state
    fn abort(&self, key: &ExecutionKey, job: AbortedJob, reason: String);

    /// The drain observed an empty mailbox and is about to recheck it
    fn queue_drained(&self, _key: &ExecutionKey) {}
}

/// Identity of a job that panicked mid-flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub intent_id: Option<String>,
}

/// Exclusive right to drain one key
#[derive(Debug, Default)]
pub struct DrainTurn {
    active: Mutex<bool>,
}

impl DrainTurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the turn if nobody holds it
    pub fn try_claim(&self) -> bool {
        let mut active = self.active.lock();
        if *active {
            false
        } else {
            *active = true;
            true
        }
    }

    /// Give the turn back without draining
    pub fn release(&self) {
        *self.active.lock() = false;
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }
}

/// Runner counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub kicks: u64,
    pub kicks_accepted: u64,
    pub drains: u64,
    pub rechecks: u64,
    pub jobs_processed: u64,
    pub panics: u64,
}

#[derive(Default)]
struct StatsInner {
    kicks: AtomicU64,
    kicks_accepted: AtomicU64,
    drains: AtomicU64,
    rechecks: AtomicU64,
    jobs_processed: AtomicU64,
    panics: AtomicU64,
}

/// Drives per-key drains
pub struct Runner {
    mailboxes: Arc<MailboxManager>,

    /// Drain turn per key
    turns: DashMap<ExecutionKey, Arc<DrainTurn>>,

    tracer: Tracer,

    /// Signalled whenever a drain ends
    idle: Notify,

    stats: StatsInner,
}

impl Runner {
    pub fn new(mailboxes: Arc<MailboxManager>, tracer: Tracer) -> Self {
        Self {
            mailboxes,
            turns: DashMap::new(),
            tracer,
            idle: Notify::new(),
            stats: StatsInner::default(),
        }
    }

    /// Turn for `key`, created on first use
    pub fn turn(&self, key: &ExecutionKey) -> Arc<DrainTurn> {
        self.turns
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DrainTurn::new()))
            .value()
            .clone()
    }

    /// Whether a drain currently holds `key`
    pub fn is_draining(&self, key: &ExecutionKey) -> bool {
        self.turns
            .get(key)
            .map(|turn| turn.is_active())
            .unwrap_or(false)
    }

    /// Forget the turn of a torn-down key
    pub fn remove(&self, key: &ExecutionKey) {
        self.turns.remove(key);
    }

    /// Notified whenever any drain ends
    pub fn idle(&self) -> &Notify {
        &self.idle
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            kicks: self.stats.kicks.load(Ordering::Relaxed),
            kicks_accepted: self.stats.kicks_accepted.load(Ordering::Relaxed),
            drains: self.stats.drains.load(Ordering::Relaxed),
            rechecks: self.stats.rechecks.load(Ordering::Relaxed),
            jobs_processed: self.stats.jobs_processed.load(Ordering::Relaxed),
            panics: self.stats.panics.load(Ordering::Relaxed),
        }
    }

    /// Start a drain for `key` unless its mailbox is empty or a drain is
    /// already running
    ///
    /// Returns whether a new drain was spawned. A rejected kick never loses
    /// work: the active drain rechecks the mailbox before going idle. An
    /// accepted `runner:kick` is traced before the drain task exists, so it
    /// always precedes that drain's `runner:start`.
    pub fn kick(self: &Arc<Self>, key: &ExecutionKey, processor: Arc<dyn JobProcessor>) -> bool {
        self.stats.kicks.fetch_add(1, Ordering::Relaxed);

        let Some(runtime) = self.claim(key) else {
            self.tracer.emit(TraceEvent::RunnerKick {
                key: key.clone(),
                accepted: false,
            });
            return false;
        };

        self.tracer.emit(TraceEvent::RunnerKick {
            key: key.clone(),
            accepted: true,
        });
        self.stats.kicks_accepted.fetch_add(1, Ordering::Relaxed);

        let runner = Arc::clone(self);
        let key = key.clone();
        runtime.spawn(async move {
            runner.drain_claimed(&key, processor).await;
        });
        true
    }

    /// Claim `key`'s turn if it has work and a runtime is available to drain it
    fn claim(&self, key: &ExecutionKey) -> Option<tokio::runtime::Handle> {
        let has_work = self
            .mailboxes
            .get(key)
            .map(|mailbox| !mailbox.is_empty())
            .unwrap_or(false);
        if !has_work {
            return None;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(key = %key, "Cannot start drain outside a tokio runtime");
                return None;
            }
        };

        if !self.turn(key).try_claim() {
            return None;
        }
        Some(runtime)
    }

    /// Drain `key` while holding its turn
    ///
    /// The caller must have claimed the turn. Returns the number of jobs
    /// processed; the turn is released before returning.
    pub async fn drain_claimed(&self, key: &ExecutionKey, processor: Arc<dyn JobProcessor>) -> u64 {
        let turn = self.turn(key);
        let mailbox = self.mailboxes.get_or_create(key);

        self.stats.drains.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_names::DRAINS_STARTED).increment(1);
        self.tracer.emit(TraceEvent::RunnerStart { key: key.clone() });
        debug!(key = %key, "Drain started");

        let mut processed = 0u64;
        loop {
            while let Some(envelope) = mailbox.dequeue() {
                self.run_job(key, envelope, processor.as_ref()).await;
                processed += 1;
            }

            processor.queue_drained(key);
            if !self.recheck(key, &turn, &mailbox, processed) {
                break;
            }
        }

        debug!(key = %key, jobs = processed, "Drain finished");
        self.idle.notify_waiters();
        processed
    }

    /// Recheck the mailbox under the turn
    ///
    /// Returns true if work arrived and the drain must continue. Otherwise
    /// emits `runner:end` and releases the turn, both before any other kick
    /// can claim it.
    fn recheck(
        &self,
        key: &ExecutionKey,
        turn: &DrainTurn,
        mailbox: &ExecutionMailbox,
        processed: u64,
    ) -> bool {
        let mut active = turn.active.lock();

        let pending = mailbox.len();
        if pending > 0 {
            self.stats.rechecks.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_names::RECHECKS).increment(1);
            debug!(key = %key, pending, "Recheck found new work");
            self.tracer.emit(TraceEvent::RunnerRecheck {
                key: key.clone(),
                pending,
            });
            return true;
        }

        self.tracer.emit(TraceEvent::RunnerEnd {
            key: key.clone(),
            jobs_processed: processed,
        });
        *active = false;
        false
    }

    async fn run_job(&self, key: &ExecutionKey, envelope: Envelope, processor: &dyn JobProcessor) {
        let job = AbortedJob {
            id: envelope.id,
            kind: envelope.job.kind(),
            intent_id: envelope.job.intent_id().map(str::to_string),
        };

        let result = AssertUnwindSafe(processor.process(key, envelope))
            .catch_unwind()
            .await;
        self.stats.jobs_processed.fetch_add(1, Ordering::Relaxed);

        if let Err(panic) = result {
            let reason = panic_message(panic.as_ref());
            error!(key = %key, job_id = %job.id, job = job.kind.as_str(), "Job panicked: {}", reason);
            self.stats.panics.fetch_add(1, Ordering::Relaxed);
            processor.abort(key, job, reason);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}
