// src/runtime/mod.rs
//! Per-key job execution runtime
//!
//! This module provides the serialized execution core:
//!
//! - **Mailbox**: Per-key FIFO job queues and their manager
//! - **Job**: The job sum type and outcomes
//! - **Frozen**: Deterministic host context captured once per job
//! - **Context**: Per-key snapshot head, intent slots, fatal state
//! - **Runner**: Single-writer drain loop with recheck
//! - **Handlers**: StartIntent, ContinueCompute, FulfillEffect, ApplyPatches
//! - **Host**: Owning facade tying the pieces together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Host                            │
//! │                                                          │
//! │   key "a"                key "b"                key "c"  │
//! │  ┌────────┐            ┌────────┐            ┌────────┐  │
//! │  │Mailbox │            │Mailbox │            │Mailbox │  │
//! │  │Context │            │Context │            │Context │  │
//! │  └───┬────┘            └───┬────┘            └───┬────┘  │
//! │      │ drain               │ drain               │       │
//! │      ▼                     ▼                     ▼       │
//! │  ┌──────────────────────────────────────────────────┐    │
//! │  │       Runner (one drain task per key)            │    │
//! │  └──────────────────────────────────────────────────┘    │
//! │                      │ handlers                          │
//! │                      ▼                                   │
//! │          Core::compute / Core::apply                     │
//! │          EffectRunner::dispatch ──► FulfillEffect        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Single writer**: at most one job runs per key at any instant
//! - **FIFO**: jobs for one key run in enqueue order
//! - **Parallel keys**: different keys share no mutable state

pub mod context;
pub mod frozen;
pub mod handlers;
pub mod host;
pub mod job;
pub mod mailbox;
pub mod runner;

// Re-export commonly used types
pub use context::{ExecutionContext, FatalEscalation, IntentSlot, SlotStatus};
pub use frozen::{FixedContextProvider, HostContext, HostContextProvider, SystemContextProvider};
pub use host::{Host, HostBuilder};
pub use job::{Job, JobId, JobKind, JobOutcome};
pub use mailbox::{Envelope, ExecutionKey, ExecutionMailbox, MailboxManager, MailboxStats};
pub use runner::{DrainTurn, JobProcessor, Runner, RunnerStats};
