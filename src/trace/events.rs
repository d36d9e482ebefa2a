// src/trace/events.rs
//! Trace event taxonomy
//!
//! Event names follow the `area:step` convention consumed by compliance
//! tooling (`runner:kick`, `effect:fulfill:drop`, ...).

use crate::core::ComputeStatus;
use crate::runtime::job::{JobId, JobKind, JobOutcome};
use crate::runtime::mailbox::ExecutionKey;
use serde::{Deserialize, Serialize};

/// Why a fulfillment was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Requirement no longer pending (already cleared or never raised)
    Stale,
}

/// Step of the fulfillment protocol that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillErrorPhase {
    /// Result patches could not be applied
    Apply,
    /// The effect runner reported a failure
    Effect,
    /// Recording the error into the snapshot failed
    Record,
}

/// Origin of an applied patch batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    Effect,
    External(String),
}

/// Observable lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    #[serde(rename = "runner:kick")]
    RunnerKick { key: ExecutionKey, accepted: bool },

    #[serde(rename = "runner:start")]
    RunnerStart { key: ExecutionKey },

    #[serde(rename = "runner:end")]
    RunnerEnd { key: ExecutionKey, jobs_processed: u64 },

    /// The drain released the key, found new work, and reclaimed it
    #[serde(rename = "runner:recheck")]
    RunnerRecheck { key: ExecutionKey, pending: usize },

    #[serde(rename = "job:start")]
    JobStart {
        key: ExecutionKey,
        job_id: JobId,
        job: JobKind,
    },

    #[serde(rename = "job:end")]
    JobEnd {
        key: ExecutionKey,
        job_id: JobId,
        job: JobKind,
        outcome: JobOutcome,
    },

    #[serde(rename = "core:compute")]
    CoreCompute {
        key: ExecutionKey,
        intent_id: String,
        iteration: u32,
        status: ComputeStatus,
        requirement_count: usize,
    },

    #[serde(rename = "core:apply")]
    CoreApply {
        key: ExecutionKey,
        source: PatchSource,
        patch_count: usize,
    },

    #[serde(rename = "effect:dispatch")]
    EffectDispatch {
        key: ExecutionKey,
        intent_id: String,
        requirement_id: String,
        effect_type: String,
    },

    #[serde(rename = "effect:fulfill:drop")]
    EffectFulfillDrop {
        key: ExecutionKey,
        requirement_id: String,
        reason: DropReason,
    },

    #[serde(rename = "effect:fulfill:apply")]
    EffectFulfillApply {
        key: ExecutionKey,
        requirement_id: String,
        patch_count: usize,
    },

    #[serde(rename = "effect:fulfill:error")]
    EffectFulfillError {
        key: ExecutionKey,
        requirement_id: String,
        phase: FulfillErrorPhase,
        message: String,
    },

    #[serde(rename = "requirement:clear")]
    RequirementClear {
        key: ExecutionKey,
        requirement_id: String,
    },

    #[serde(rename = "continue:enqueue")]
    ContinueEnqueue {
        key: ExecutionKey,
        intent_id: String,
        iteration: u32,
    },

    #[serde(rename = "context:frozen")]
    ContextFrozen {
        key: ExecutionKey,
        now: i64,
        random_seed: String,
    },

    #[serde(rename = "fatal:escalate")]
    FatalEscalate {
        key: ExecutionKey,
        intent_id: String,
        message: String,
    },
}

impl TraceEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::RunnerKick { .. } => "runner:kick",
            TraceEvent::RunnerStart { .. } => "runner:start",
            TraceEvent::RunnerEnd { .. } => "runner:end",
            TraceEvent::RunnerRecheck { .. } => "runner:recheck",
            TraceEvent::JobStart { .. } => "job:start",
            TraceEvent::JobEnd { .. } => "job:end",
            TraceEvent::CoreCompute { .. } => "core:compute",
            TraceEvent::CoreApply { .. } => "core:apply",
            TraceEvent::EffectDispatch { .. } => "effect:dispatch",
            TraceEvent::EffectFulfillDrop { .. } => "effect:fulfill:drop",
            TraceEvent::EffectFulfillApply { .. } => "effect:fulfill:apply",
            TraceEvent::EffectFulfillError { .. } => "effect:fulfill:error",
            TraceEvent::RequirementClear { .. } => "requirement:clear",
            TraceEvent::ContinueEnqueue { .. } => "continue:enqueue",
            TraceEvent::ContextFrozen { .. } => "context:frozen",
            TraceEvent::FatalEscalate { .. } => "fatal:escalate",
        }
    }

    /// Key the event belongs to
    pub fn key(&self) -> &ExecutionKey {
        match self {
            TraceEvent::RunnerKick { key, .. }
            | TraceEvent::RunnerStart { key }
            | TraceEvent::RunnerEnd { key, .. }
            | TraceEvent::RunnerRecheck { key, .. }
            | TraceEvent::JobStart { key, .. }
            | TraceEvent::JobEnd { key, .. }
            | TraceEvent::CoreCompute { key, .. }
            | TraceEvent::CoreApply { key, .. }
            | TraceEvent::EffectDispatch { key, .. }
            | TraceEvent::EffectFulfillDrop { key, .. }
            | TraceEvent::EffectFulfillApply { key, .. }
            | TraceEvent::EffectFulfillError { key, .. }
            | TraceEvent::RequirementClear { key, .. }
            | TraceEvent::ContinueEnqueue { key, .. }
            | TraceEvent::ContextFrozen { key, .. }
            | TraceEvent::FatalEscalate { key, .. } => key,
        }
    }
}

/// A trace event with its emission order and wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Monotonic per-tracer sequence number
    pub seq: u64,

    /// Nanoseconds since epoch
    pub timestamp_ns: i64,

    #[serde(flatten)]
    pub event: TraceEvent,
}
