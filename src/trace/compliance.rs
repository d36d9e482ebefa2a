// src/trace/compliance.rs
//! Trace compliance checking
//!
//! Replays a recorded trace and reports every place where the engine's
//! lifecycle invariants do not hold.
//!
//! # Rules
//!
//! - **Single writer**: no `runner:start` for a key that is already draining,
//!   and no `job:start` outside a drain.
//! - **Exactly-once clear**: a requirement id is cleared at most once per
//!   key, and only after it was dispatched.
//! - **Unconditional clear**: a job that emits `effect:fulfill:apply` for a
//!   requirement also emits `requirement:clear` for it (unless the job
//!   escalated to fatal).
//! - **Stale drops are no-ops**: a dropped fulfillment neither applies nor
//!   clears in the same job.
//! - **Fatal halts**: no `continue:enqueue` after `fatal:escalate` in the
//!   same job, and no `core:apply` on the key afterwards.
//! - **Balanced jobs**: every `job:start` is closed by `job:end`.

use crate::runtime::mailbox::ExecutionKey;
use crate::trace::events::{TraceEvent, TraceRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Severity of a compliance violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Notable, possibly caused by a truncated trace
    Warn,
    /// Invariant violated, execution continued
    Error,
    /// Invariant whose violation corrupts state
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Classification of compliance violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationCode {
    /// Second drain started while one is active
    OverlappingDrain,
    /// Job started with no active drain
    JobOutsideDrain,
    /// Job started before the previous one ended, or never ended
    UnbalancedJob,
    /// Requirement cleared more than once
    DuplicateClear,
    /// Requirement cleared without a recorded dispatch
    ClearWithoutDispatch,
    /// Fulfillment applied but never cleared in the same job
    ApplyWithoutClear,
    /// Dropped fulfillment still applied or cleared
    DropNotNoop,
    /// Continuation scheduled after fatal escalation
    ContinueAfterFatal,
    /// Snapshot mutated after fatal escalation
    MutationAfterFatal,
}

impl ViolationCode {
    pub fn severity(&self) -> Severity {
        match self {
            ViolationCode::UnbalancedJob | ViolationCode::ClearWithoutDispatch => Severity::Warn,
            ViolationCode::JobOutsideDrain
            | ViolationCode::ApplyWithoutClear
            | ViolationCode::DropNotNoop => Severity::Error,
            ViolationCode::OverlappingDrain
            | ViolationCode::DuplicateClear
            | ViolationCode::ContinueAfterFatal
            | ViolationCode::MutationAfterFatal => Severity::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::OverlappingDrain => "OVERLAPPING_DRAIN",
            ViolationCode::JobOutsideDrain => "JOB_OUTSIDE_DRAIN",
            ViolationCode::UnbalancedJob => "UNBALANCED_JOB",
            ViolationCode::DuplicateClear => "DUPLICATE_CLEAR",
            ViolationCode::ClearWithoutDispatch => "CLEAR_WITHOUT_DISPATCH",
            ViolationCode::ApplyWithoutClear => "APPLY_WITHOUT_CLEAR",
            ViolationCode::DropNotNoop => "DROP_NOT_NOOP",
            ViolationCode::ContinueAfterFatal => "CONTINUE_AFTER_FATAL",
            ViolationCode::MutationAfterFatal => "MUTATION_AFTER_FATAL",
        }
    }
}

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub code: ViolationCode,
    pub severity: Severity,
    pub key: ExecutionKey,

    /// Sequence number of the offending record (or the last record for
    /// end-of-trace findings)
    pub seq: u64,

    pub message: String,
}

/// Outcome of a compliance run
#[derive(Debug, Clone, Default)]
pub struct ComplianceReport {
    pub violations: Vec<Violation>,
    pub events_checked: usize,
}

impl ComplianceReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    pub fn count(&self, code: ViolationCode) -> usize {
        self.violations.iter().filter(|v| v.code == code).count()
    }

    pub fn by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for v in &self.violations {
            *counts.entry(v.severity).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Default)]
struct JobScope {
    applied: HashSet<String>,
    cleared: HashSet<String>,
    dropped: HashSet<String>,
    fatal: bool,
    seq: u64,
}

#[derive(Default)]
struct KeyState {
    draining: bool,
    halted: bool,
    job: Option<JobScope>,
    dispatched: HashSet<String>,
    cleared: HashSet<String>,
}

/// Stateless checker; one call per trace
#[derive(Debug, Default, Clone, Copy)]
pub struct ComplianceChecker;

impl ComplianceChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check records (assumed ordered by `seq`)
    pub fn check(&self, records: &[TraceRecord]) -> ComplianceReport {
        let mut keys: HashMap<ExecutionKey, KeyState> = HashMap::new();
        let mut violations = Vec::new();

        for record in records {
            let key = record.event.key().clone();
            let state = keys.entry(key.clone()).or_default();
            let mut flag = |code: ViolationCode, message: String| {
                violations.push(Violation {
                    code,
                    severity: code.severity(),
                    key: key.clone(),
                    seq: record.seq,
                    message,
                });
            };

            match &record.event {
                TraceEvent::RunnerStart { .. } => {
                    if state.draining {
                        flag(
                            ViolationCode::OverlappingDrain,
                            "runner:start while a drain is active".to_string(),
                        );
                    }
                    state.draining = true;
                }
                TraceEvent::RunnerEnd { .. } => {
                    state.draining = false;
                }
                TraceEvent::JobStart { job_id, .. } => {
                    if !state.draining {
                        flag(
                            ViolationCode::JobOutsideDrain,
                            format!("job {} started outside a drain", job_id),
                        );
                    }
                    if state.job.is_some() {
                        flag(
                            ViolationCode::UnbalancedJob,
                            format!("job {} started before the previous job ended", job_id),
                        );
                    }
                    state.job = Some(JobScope {
                        seq: record.seq,
                        ..Default::default()
                    });
                }
                TraceEvent::JobEnd { job_id, .. } => {
                    if let Some(scope) = state.job.take() {
                        if !scope.fatal {
                            for requirement_id in scope.applied.difference(&scope.cleared) {
                                flag(
                                    ViolationCode::ApplyWithoutClear,
                                    format!(
                                        "job {} applied {} without clearing it",
                                        job_id, requirement_id
                                    ),
                                );
                            }
                        }
                    }
                }
                TraceEvent::CoreApply { .. } => {
                    if state.halted {
                        flag(
                            ViolationCode::MutationAfterFatal,
                            "core:apply on a halted key".to_string(),
                        );
                    }
                }
                TraceEvent::EffectDispatch { requirement_id, .. } => {
                    state.dispatched.insert(requirement_id.clone());
                }
                TraceEvent::EffectFulfillDrop { requirement_id, .. } => {
                    if let Some(scope) = state.job.as_mut() {
                        if scope.applied.contains(requirement_id)
                            || scope.cleared.contains(requirement_id)
                        {
                            flag(
                                ViolationCode::DropNotNoop,
                                format!("{} dropped after being handled in the same job", requirement_id),
                            );
                        }
                        scope.dropped.insert(requirement_id.clone());
                    }
                }
                TraceEvent::EffectFulfillApply { requirement_id, .. } => {
                    if let Some(scope) = state.job.as_mut() {
                        if scope.dropped.contains(requirement_id) {
                            flag(
                                ViolationCode::DropNotNoop,
                                format!("{} applied after being dropped", requirement_id),
                            );
                        }
                        scope.applied.insert(requirement_id.clone());
                    }
                }
                TraceEvent::RequirementClear { requirement_id, .. } => {
                    if !state.cleared.insert(requirement_id.clone()) {
                        flag(
                            ViolationCode::DuplicateClear,
                            format!("{} cleared more than once", requirement_id),
                        );
                    }
                    if !state.dispatched.contains(requirement_id) {
                        flag(
                            ViolationCode::ClearWithoutDispatch,
                            format!("{} cleared without a recorded dispatch", requirement_id),
                        );
                    }
                    if let Some(scope) = state.job.as_mut() {
                        if scope.dropped.contains(requirement_id) {
                            flag(
                                ViolationCode::DropNotNoop,
                                format!("{} cleared after being dropped", requirement_id),
                            );
                        }
                        scope.cleared.insert(requirement_id.clone());
                    }
                }
                TraceEvent::ContinueEnqueue { intent_id, .. } => {
                    if state.job.as_ref().is_some_and(|s| s.fatal) {
                        flag(
                            ViolationCode::ContinueAfterFatal,
                            format!("continue enqueued for {} after fatal escalation", intent_id),
                        );
                    }
                }
                TraceEvent::FatalEscalate { .. } => {
                    state.halted = true;
                    if let Some(scope) = state.job.as_mut() {
                        scope.fatal = true;
                    }
                }
                TraceEvent::RunnerKick { .. }
                | TraceEvent::RunnerRecheck { .. }
                | TraceEvent::CoreCompute { .. }
                | TraceEvent::EffectFulfillError { .. }
                | TraceEvent::ContextFrozen { .. } => {}
            }
        }

        for (key, state) in keys {
            if let Some(scope) = state.job {
                violations.push(Violation {
                    code: ViolationCode::UnbalancedJob,
                    severity: ViolationCode::UnbalancedJob.severity(),
                    key,
                    seq: scope.seq,
                    message: "job started but never ended".to_string(),
                });
            }
        }

        violations.sort_by_key(|v| v.seq);
        ComplianceReport {
            violations,
            events_checked: records.len(),
        }
    }
}
