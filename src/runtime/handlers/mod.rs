// src/runtime/handlers/mod.rs
//! Job handlers
//!
//! One function per job variant, each operating on the [`ExecutionContext`]
//! of the key that holds the drain turn:
//!
//! - **StartIntent**: seed the context, open an intent slot, enqueue the
//!   first compute step
//! - **ContinueCompute**: one Core compute step, then dispatch requirements
//!   or schedule the next step
//! - **FulfillEffect**: stale check → apply → clear → record → continue,
//!   as one unsplit job
//! - **ApplyPatches**: externally sourced patches, no requirement interaction

pub mod apply_patches;
pub mod continue_compute;
pub mod fulfill_effect;
pub mod start_intent;

use crate::core::{ErrorSource, ErrorValue};
use crate::runtime::context::ExecutionContext;
use crate::runtime::job::{Job, JobOutcome};
use serde_json::Value;

/// Error codes the engine writes into `system.errors`
///
/// A failed fulfillment records one of two codes: a runner-reported
/// failure (handler error, timeout, unknown effect type) is
/// `EFFECT_EXECUTION_FAILED` with the runner's message; a successful
/// effect whose result patches Core rejects is `EFFECT_APPLY_FAILED`.
pub mod codes {
    /// Result patches of a fulfilled effect could not be applied
    pub const EFFECT_APPLY_FAILED: &str = "EFFECT_APPLY_FAILED";
    /// The effect runner reported a failure for the requirement
    pub const EFFECT_EXECUTION_FAILED: &str = "EFFECT_EXECUTION_FAILED";
    /// `Core::compute` returned an error
    pub const COMPUTE_FAILED: &str = "COMPUTE_FAILED";
    /// An intent exceeded `runtime.max_continue_iterations`
    pub const HOST_LOOP_LIMIT: &str = "HOST_LOOP_LIMIT";
}

/// Run the handler matching `job`
pub async fn dispatch(ctx: &ExecutionContext, job: Job) -> JobOutcome {
    match job {
        Job::StartIntent { intent, snapshot } => start_intent::handle(ctx, intent, snapshot),
        Job::ContinueCompute {
            intent_id,
            iteration,
            intent,
        } => continue_compute::handle(ctx, intent_id, iteration, intent).await,
        Job::FulfillEffect {
            requirement_id,
            result_patches,
            effect_error,
            intent_id,
            intent,
        } => fulfill_effect::handle(
            ctx,
            fulfill_effect::Fulfillment {
                requirement_id,
                result_patches,
                effect_error,
                intent_id,
                intent,
            },
        ),
        Job::ApplyPatches { patches, source } => apply_patches::handle(ctx, patches, source),
    }
}

/// Build an error entry stamped with the job's frozen clock
pub(crate) fn error_value(
    ctx: &ExecutionContext,
    code: &str,
    message: impl Into<String>,
    source: ErrorSource,
    context: Option<Value>,
) -> ErrorValue {
    ErrorValue {
        code: code.to_string(),
        message: message.into(),
        source,
        timestamp: ctx.get_frozen_context(None).now,
        context,
    }
}
