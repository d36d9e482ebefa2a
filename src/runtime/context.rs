// src/runtime/context.rs
//! Per-key execution context
//!
//! Holds the canonical snapshot head for one key together with everything a
//! job handler needs: the Core, the frozen host context, intent slots and
//! the effect/trace/escalation plumbing.
//!
//! # Concurrency
//!
//! State sits behind a `parking_lot::Mutex`, but the lock is never the
//! serialization mechanism: only the job holding the key's drain turn reads
//! or writes the head. The mutex only makes the context `Sync` for
//! read-only observers (`Host::snapshot`, `Host::intent_status`).
//!
//! Submissions from outside a drain pass through an admission gate
//! ([`ExecutionContext::admit`]). Teardown closes the gate under its write
//! lock, so a job is either accepted before teardown starts (and teardown
//! sees it) or rejected.
//!
//! ```text
//! ExecutionContext
//! ├─ snapshot        (head, replaced never mutated)
//! ├─ frozen          (HostContext, reset at every job start)
//! ├─ intent slots    (intent id → IntentSlot)
//! └─ halted          (Some after fatal escalation)
//! ```

use crate::core::{
    ComputeStatus, Core, CoreError, ErrorValue, Intent, Patch, Requirement, Schema, Snapshot,
    SystemDelta,
};
use crate::effects::{EffectRequest, EffectRunner, FulfillmentHandle, JobSubmitter};
use crate::observability::metric_names;
use crate::runtime::frozen::{HostContext, HostContextProvider};
use crate::runtime::job::{Job, JobId};
use crate::runtime::mailbox::{ExecutionKey, ExecutionMailbox};
use crate::trace::{PatchSource, TraceEvent, Tracer};
use crate::utils::errors::{EngineError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Callback invoked once when a key is escalated to fatal
pub type EscalationHook = Arc<dyn Fn(&FatalEscalation) + Send + Sync>;

/// Lifecycle of one intent on a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Running,
    Completed,
    Failed,
}

/// Per-intent bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSlot {
    pub intent: Intent,

    /// Compute steps run so far
    pub iterations: u32,

    pub status: SlotStatus,

    /// Status of the most recent compute step
    pub last_compute: Option<ComputeStatus>,

    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl IntentSlot {
    pub fn new(intent: Intent, started_at: i64) -> Self {
        Self {
            intent,
            iterations: 0,
            status: SlotStatus::Running,
            last_compute: None,
            started_at,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != SlotStatus::Running
    }
}

/// Record of an unrecoverable failure on a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalEscalation {
    pub key: ExecutionKey,
    pub intent_id: String,
    pub message: String,

    /// Milliseconds since epoch
    pub at: i64,
}

/// Collaborators shared by every context a host creates
#[derive(Clone)]
pub struct ContextDeps {
    pub core: Arc<dyn Core>,
    pub schema: Arc<Schema>,
    pub effects: Arc<dyn EffectRunner>,
    pub provider: Arc<dyn HostContextProvider>,
    pub tracer: Tracer,

    /// Re-entry point handed to fulfillment handles
    pub submitter: Weak<dyn JobSubmitter>,

    pub on_fatal: Option<EscalationHook>,
    pub max_continue_iterations: u32,

    /// Finished intent slots kept per key; older ones are evicted
    pub retained_finished_slots: usize,
}

struct ContextState {
    snapshot: Snapshot,
    frozen: Option<HostContext>,
    slots: HashMap<String, IntentSlot>,

    /// Finished slot ids, oldest first
    finished: VecDeque<String>,

    halted: Option<FatalEscalation>,
}

/// Mutable run state for one execution key
pub struct ExecutionContext {
    key: ExecutionKey,
    mailbox: Arc<ExecutionMailbox>,
    deps: ContextDeps,

    /// Dispatched effects whose fulfillment has not been enqueued yet
    in_flight: Arc<AtomicUsize>,

    /// True once torn down
    closed: RwLock<bool>,

    state: Mutex<ContextState>,
}

impl ExecutionContext {
    /// Create a context whose head is the schema's genesis snapshot
    pub fn new(key: ExecutionKey, mailbox: Arc<ExecutionMailbox>, deps: ContextDeps) -> Self {
        let snapshot = Snapshot::genesis(deps.schema.hash.clone());
        Self {
            key,
            mailbox,
            deps,
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: RwLock::new(false),
            state: Mutex::new(ContextState {
                snapshot,
                frozen: None,
                slots: HashMap::new(),
                finished: VecDeque::new(),
                halted: None,
            }),
        }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn mailbox(&self) -> &Arc<ExecutionMailbox> {
        &self.mailbox
    }

    pub fn core(&self) -> &Arc<dyn Core> {
        &self.deps.core
    }

    pub fn schema(&self) -> &Schema {
        &self.deps.schema
    }

    pub fn max_continue_iterations(&self) -> u32 {
        self.deps.max_continue_iterations
    }

    /// Number of dispatched effects still owing a fulfillment
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Snapshot head
    // ---------------------------------------------------------------------

    pub fn get_snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.state.lock().snapshot = snapshot;
    }

    // ---------------------------------------------------------------------
    // Frozen host context
    // ---------------------------------------------------------------------

    /// Forget the frozen context; called once at every job boundary
    pub fn reset_frozen_context(&self) {
        self.state.lock().frozen = None;
    }

    /// Frozen context for the current job, captured on first use
    pub fn get_frozen_context(&self, intent_id: Option<&str>) -> HostContext {
        let mut state = self.state.lock();
        if let Some(ctx) = &state.frozen {
            return ctx.clone();
        }

        let ctx = self.deps.provider.capture(intent_id);
        state.frozen = Some(ctx.clone());
        drop(state);

        self.trace(TraceEvent::ContextFrozen {
            key: self.key.clone(),
            now: ctx.now,
            random_seed: ctx.random_seed.clone(),
        });
        ctx
    }

    // ---------------------------------------------------------------------
    // Snapshot mutation through the Core
    // ---------------------------------------------------------------------

    /// Apply `patches` to the head through `Core::apply`
    ///
    /// Errors are returned untouched; the calling handler decides whether to
    /// recover.
    pub fn apply_patches(
        &self,
        patches: &[Patch],
        source: PatchSource,
    ) -> std::result::Result<(), CoreError> {
        let ctx = self.get_frozen_context(None);
        let snapshot = self.get_snapshot();
        let next = self
            .deps
            .core
            .apply(&self.deps.schema, &snapshot, patches, &ctx)?;
        self.set_snapshot(next);

        self.trace(TraceEvent::CoreApply {
            key: self.key.clone(),
            source,
            patch_count: patches.len(),
        });
        Ok(())
    }

    pub fn is_pending_requirement(&self, requirement_id: &str) -> bool {
        self.state.lock().snapshot.system.is_pending(requirement_id)
    }

    /// The pending requirement with `requirement_id`, if any
    pub fn pending_requirement(&self, requirement_id: &str) -> Option<Requirement> {
        self.state
            .lock()
            .snapshot
            .system
            .pending_requirements
            .iter()
            .find(|r| r.id == requirement_id)
            .cloned()
    }

    /// Remove a requirement from `pendingRequirements`
    ///
    /// The only path by which a requirement leaves the pending list.
    /// Clearing the last one sets `status = idle`.
    pub fn clear_requirement(&self, requirement_id: &str) -> Result<()> {
        if !self.is_pending_requirement(requirement_id) {
            return Err(EngineError::RequirementNotPending(requirement_id.to_string()));
        }

        let ctx = self.get_frozen_context(None);
        let snapshot = self.get_snapshot();
        let next = self.deps.core.apply_system(
            &snapshot,
            &SystemDelta::clear_requirement(requirement_id),
            &ctx,
        )?;
        self.set_snapshot(next);

        self.trace(TraceEvent::RequirementClear {
            key: self.key.clone(),
            requirement_id: requirement_id.to_string(),
        });
        metrics::counter!(metric_names::REQUIREMENTS_CLEARED).increment(1);
        Ok(())
    }

    /// Append error entries to `system.errors`
    pub fn record_errors(&self, errors: Vec<ErrorValue>) -> std::result::Result<(), CoreError> {
        if errors.is_empty() {
            return Ok(());
        }

        let count = errors.len() as u64;
        let ctx = self.get_frozen_context(None);
        let snapshot = self.get_snapshot();
        let delta = SystemDelta {
            remove_requirements: Vec::new(),
            append_errors: errors,
        };
        let next = self.deps.core.apply_system(&snapshot, &delta, &ctx)?;
        self.set_snapshot(next);

        metrics::counter!(metric_names::ERRORS_RECORDED).increment(count);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Effects
    // ---------------------------------------------------------------------

    /// Hand a requirement to the effect runner without waiting for it
    ///
    /// The result re-enters this key's mailbox as a `FulfillEffect` job
    /// through the fulfillment handle.
    pub fn request_effect_execution(
        &self,
        intent_id: &str,
        requirement_id: &str,
        effect_type: &str,
        params: &Value,
        intent: &Intent,
    ) {
        let handle = FulfillmentHandle::new(
            self.key.clone(),
            intent.clone(),
            requirement_id,
            self.deps.submitter.clone(),
            Arc::clone(&self.in_flight),
        );
        let request = EffectRequest {
            key: self.key.clone(),
            intent_id: intent_id.to_string(),
            requirement_id: requirement_id.to_string(),
            effect_type: effect_type.to_string(),
            params: params.clone(),
            intent: intent.clone(),
        };

        debug!(key = %self.key, requirement_id, effect_type, "Dispatching effect");
        metrics::counter!(metric_names::EFFECTS_DISPATCHED, "type" => effect_type.to_string())
            .increment(1);
        self.deps.effects.dispatch(request, handle);
    }

    // ---------------------------------------------------------------------
    // Fatal escalation
    // ---------------------------------------------------------------------

    /// Halt the key; no later job may mutate its state
    ///
    /// Only the first escalation is recorded and reported.
    pub fn escalate_to_fatal(&self, intent_id: &str, message: impl Into<String>) {
        let message = message.into();
        let escalation = {
            let mut state = self.state.lock();
            if state.halted.is_some() {
                return;
            }
            let at = state
                .frozen
                .as_ref()
                .map(|ctx| ctx.now)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let escalation = FatalEscalation {
                key: self.key.clone(),
                intent_id: intent_id.to_string(),
                message: message.clone(),
                at,
            };
            state.halted = Some(escalation.clone());
            escalation
        };

        error!(key = %self.key, intent_id, "Fatal escalation: {}", message);
        self.trace(TraceEvent::FatalEscalate {
            key: self.key.clone(),
            intent_id: intent_id.to_string(),
            message,
        });
        metrics::counter!(metric_names::FATAL_ESCALATIONS).increment(1);

        if let Some(hook) = &self.deps.on_fatal {
            hook(&escalation);
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted.is_some()
    }

    pub fn fatal(&self) -> Option<FatalEscalation> {
        self.state.lock().halted.clone()
    }

    // ---------------------------------------------------------------------
    // Intent slots
    // ---------------------------------------------------------------------

    pub fn insert_slot(&self, slot: IntentSlot) {
        let intent_id = slot.intent.intent_id.clone();
        let mut state = self.state.lock();
        state.finished.retain(|id| *id != intent_id);
        state.slots.insert(intent_id, slot);
    }

    pub fn slot(&self, intent_id: &str) -> Option<IntentSlot> {
        self.state.lock().slots.get(intent_id).cloned()
    }

    pub fn slots(&self) -> Vec<IntentSlot> {
        self.state.lock().slots.values().cloned().collect()
    }

    /// Iteration number for the next compute step of `intent_id`
    pub fn next_iteration(&self, intent_id: &str) -> u32 {
        self.state
            .lock()
            .slots
            .get(intent_id)
            .map(|slot| slot.iterations)
            .unwrap_or(0)
    }

    /// Count one compute step
    pub fn note_compute(&self, intent_id: &str, status: ComputeStatus) {
        if let Some(slot) = self.state.lock().slots.get_mut(intent_id) {
            slot.iterations += 1;
            slot.last_compute = Some(status);
        }
    }

    /// Mark a slot finished and evict the oldest finished slots beyond the
    /// retention limit
    pub fn finish_slot(&self, intent_id: &str, status: SlotStatus, at: i64) {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(intent_id) else {
            return;
        };
        let newly_finished = !slot.is_finished();
        slot.status = status;
        slot.finished_at = Some(at);

        if newly_finished {
            state.finished.push_back(intent_id.to_string());
        }
        while state.finished.len() > self.deps.retained_finished_slots {
            if let Some(evicted) = state.finished.pop_front() {
                state.slots.remove(&evicted);
                debug!(key = %self.key, intent_id = %evicted, "Evicted finished intent slot");
            }
        }
    }

    /// Drop a finished slot; running slots are kept
    pub fn forget_slot(&self, intent_id: &str) -> Option<IntentSlot> {
        let mut state = self.state.lock();
        if !state.slots.get(intent_id)?.is_finished() {
            return None;
        }
        state.finished.retain(|id| id != intent_id);
        state.slots.remove(intent_id)
    }

    // ---------------------------------------------------------------------
    // Mailbox and trace
    // ---------------------------------------------------------------------

    /// Append a job to this key's mailbox
    ///
    /// Called from inside a drain, so no kick is needed: the running drain
    /// picks the job up.
    pub fn enqueue(&self, job: Job) -> JobId {
        self.mailbox.enqueue(job)
    }

    /// Enqueue a job from outside the drain and run `kick` before the gate
    /// is released
    ///
    /// Returns `None` once the context has been torn down.
    pub fn admit(&self, job: Job, kick: impl FnOnce(&ExecutionKey)) -> Option<JobId> {
        let closed = self.closed.read();
        if *closed {
            return None;
        }
        let id = self.mailbox.enqueue(job);
        kick(&self.key);
        Some(id)
    }

    /// Close admission if `check` passes
    ///
    /// `check` runs under the gate's write lock: every admitted job has
    /// been enqueued and kicked, and no new job can be admitted.
    pub fn close_if(&self, check: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut closed = self.closed.write();
        check()?;
        *closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    pub fn trace(&self, event: TraceEvent) {
        self.deps.tracer.emit(event);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("key", &self.key)
            .field("in_flight", &self.in_flight())
            .field("halted", &self.is_halted())
            .finish()
    }
}
