// src/runtime/job.rs
//! Units of work processed by the per-key runner
//!
//! Jobs are an exhaustive sum type: adding a variant forces every handler
//! dispatch site to be revisited.

use crate::core::{Intent, Patch, Snapshot};
use crate::effects::EffectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of one enqueued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of engine work
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Seed the context with an intent (and optionally a snapshot), then
    /// start computing
    StartIntent {
        intent: Intent,
        snapshot: Option<Snapshot>,
    },

    /// Run one compute step for an intent
    ContinueCompute {
        intent_id: String,
        iteration: u32,
        intent: Intent,
    },

    /// Deliver the result of a dispatched effect
    FulfillEffect {
        requirement_id: String,
        result_patches: Vec<Patch>,
        effect_error: Option<EffectError>,
        intent_id: String,
        intent: Intent,
    },

    /// Apply externally sourced patches outside the compute loop
    ApplyPatches { patches: Vec<Patch>, source: String },
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::StartIntent { .. } => JobKind::StartIntent,
            Job::ContinueCompute { .. } => JobKind::ContinueCompute,
            Job::FulfillEffect { .. } => JobKind::FulfillEffect,
            Job::ApplyPatches { .. } => JobKind::ApplyPatches,
        }
    }

    /// Intent this job works on, if any
    pub fn intent_id(&self) -> Option<&str> {
        match self {
            Job::StartIntent { intent, .. } => Some(&intent.intent_id),
            Job::ContinueCompute { intent_id, .. } | Job::FulfillEffect { intent_id, .. } => {
                Some(intent_id)
            }
            Job::ApplyPatches { .. } => None,
        }
    }
}

/// Job discriminant, used in traces and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    StartIntent,
    ContinueCompute,
    FulfillEffect,
    ApplyPatches,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::StartIntent => "start_intent",
            JobKind::ContinueCompute => "continue_compute",
            JobKind::FulfillEffect => "fulfill_effect",
            JobKind::ApplyPatches => "apply_patches",
        }
    }
}

/// How a job finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Work done, nothing further scheduled by this job
    Completed,
    /// Intent reached `complete` or `error`
    Terminal,
    /// Requirements handed to the effect runner
    Dispatched,
    /// A follow-up `ContinueCompute` was enqueued
    Continued,
    /// Stale fulfillment, nothing applied
    Dropped,
    /// Intent stopped on a recoverable failure
    Failed,
    /// Key escalated to fatal during this job
    Fatal,
    /// Key already halted; job ignored
    Skipped,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Terminal => "terminal",
            JobOutcome::Dispatched => "dispatched",
            JobOutcome::Continued => "continued",
            JobOutcome::Dropped => "dropped",
            JobOutcome::Failed => "failed",
            JobOutcome::Fatal => "fatal",
            JobOutcome::Skipped => "skipped",
        }
    }
}
