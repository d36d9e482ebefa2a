// src/core/mod.rs
//! Core collaborator contract and snapshot data model
//!
//! The Core is the pure state-transition evaluator. The engine never
//! interprets domain logic; it only:
//!
//! - asks the Core to `compute` the next step of an intent
//! - asks the Core to `apply` declarative patches
//! - asks the Core to `apply_system` bookkeeping deltas (requirement
//!   clearing, error recording)
//!
//! ```text
//! ContinueCompute ──► Core::compute ──► { status, snapshot, requirements }
//! FulfillEffect   ──► Core::apply (result patches)
//!                 ──► Core::apply_system (clear requirement, record error)
//! ```

pub mod patch;
pub mod types;

pub use patch::apply_patches;
pub use types::{
    ComputeResult, ComputeStatus, ErrorSource, ErrorValue, FlowPosition, Intent, Patch, PatchOp,
    Requirement, Schema, Snapshot, SnapshotMeta, SystemState, SystemStatus,
};

use crate::runtime::frozen::HostContext;
use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a Core implementation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// A patch could not be applied to the snapshot
    #[error("invalid patch at '{path}': {reason}")]
    InvalidPatch { path: String, reason: String },

    /// The evaluator failed to compute the next step
    #[error("compute failed: {0}")]
    Compute(String),

    /// The snapshot store rejected an update
    #[error("store failure: {0}")]
    Store(String),
}

/// Bookkeeping change to `snapshot.system`
///
/// This is the only way requirements leave `pendingRequirements`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemDelta {
    /// Requirement ids to remove from `pendingRequirements`
    pub remove_requirements: Vec<String>,

    /// Errors appended to `errors`; the last one also becomes `lastError`
    pub append_errors: Vec<ErrorValue>,
}

impl SystemDelta {
    pub fn clear_requirement(requirement_id: impl Into<String>) -> Self {
        Self {
            remove_requirements: vec![requirement_id.into()],
            append_errors: vec![],
        }
    }

    pub fn record_error(error: ErrorValue) -> Self {
        Self {
            remove_requirements: vec![],
            append_errors: vec![error],
        }
    }

    /// Default system delta semantics
    ///
    /// Removing the last pending requirement sets `status = idle`.
    pub fn apply_to(&self, snapshot: &Snapshot, ctx: &HostContext) -> Snapshot {
        let mut next = snapshot.clone();
        let system = &mut next.system;

        if !self.remove_requirements.is_empty() {
            system
                .pending_requirements
                .retain(|r| !self.remove_requirements.contains(&r.id));
            if system.pending_requirements.is_empty() {
                system.status = SystemStatus::Idle;
            }
        }

        if let Some(last) = self.append_errors.last() {
            system.errors.extend(self.append_errors.iter().cloned());
            system.last_error = Some(last.clone());
        }

        patch::stamp(&mut next, ctx);
        next
    }
}

/// The pure state-transition evaluator
#[async_trait]
pub trait Core: Send + Sync {
    /// Evaluate the next step of `intent` against `snapshot`
    ///
    /// Must be deterministic for an identical `ctx`.
    async fn compute(
        &self,
        schema: &Schema,
        snapshot: &Snapshot,
        intent: &Intent,
        ctx: &HostContext,
    ) -> Result<ComputeResult, CoreError>;

    /// Apply declarative patches to `snapshot.data`
    fn apply(
        &self,
        schema: &Schema,
        snapshot: &Snapshot,
        patches: &[Patch],
        ctx: &HostContext,
    ) -> Result<Snapshot, CoreError>;

    /// Apply an engine bookkeeping delta to `snapshot.system`
    fn apply_system(
        &self,
        snapshot: &Snapshot,
        delta: &SystemDelta,
        ctx: &HostContext,
    ) -> Result<Snapshot, CoreError> {
        Ok(delta.apply_to(snapshot, ctx))
    }
}
