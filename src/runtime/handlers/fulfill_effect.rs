// src/runtime/handlers/fulfill_effect.rs
//! FulfillEffect: deliver one effect result
//!
//! Runs as a single job, in this order:
//!
//! 1. **Stale check**: requirement not pending → drop, nothing else happens
//! 2. **Apply** (best-effort): result patches through `Core::apply`
//! 3. **Clear** (unconditional): remove the requirement; failure is fatal
//! 4. **Record** (best-effort): apply or effect failure → `system.errors`
//! 5. **Continue**: enqueue the next compute step for the intent
//!
//! Steps 2 and 4 never stop the protocol. Step 3 is the only exit that skips
//! the continue.

use super::{codes, error_value};
use crate::core::{ErrorSource, ErrorValue, Intent, Patch, Requirement};
use crate::effects::EffectError;
use crate::observability::metric_names;
use crate::runtime::context::ExecutionContext;
use crate::runtime::job::{Job, JobOutcome};
use crate::trace::{DropReason, FulfillErrorPhase, PatchSource, TraceEvent};
use serde_json::json;
use tracing::{debug, warn};

/// Payload of a `FulfillEffect` job
#[derive(Debug, Clone)]
pub struct Fulfillment {
    pub requirement_id: String,
    pub result_patches: Vec<Patch>,
    pub effect_error: Option<EffectError>,
    pub intent_id: String,
    pub intent: Intent,
}

pub fn handle(ctx: &ExecutionContext, fulfillment: Fulfillment) -> JobOutcome {
    let Fulfillment {
        requirement_id,
        result_patches,
        effect_error,
        intent_id,
        intent,
    } = fulfillment;

    // 1. Stale check
    let Some(requirement) = ctx.pending_requirement(&requirement_id) else {
        debug!(key = %ctx.key(), requirement_id = %requirement_id, "Dropping stale fulfillment");
        ctx.trace(TraceEvent::EffectFulfillDrop {
            key: ctx.key().clone(),
            requirement_id,
            reason: DropReason::Stale,
        });
        metrics::counter!(metric_names::FULFILLMENTS_DROPPED).increment(1);
        return JobOutcome::Dropped;
    };

    // 2. Apply
    let mut apply_failure = None;
    if !result_patches.is_empty() {
        match ctx.apply_patches(&result_patches, PatchSource::Effect) {
            Ok(()) => ctx.trace(TraceEvent::EffectFulfillApply {
                key: ctx.key().clone(),
                requirement_id: requirement_id.clone(),
                patch_count: result_patches.len(),
            }),
            Err(e) => {
                warn!(
                    key = %ctx.key(),
                    requirement_id = %requirement_id,
                    "Effect result could not be applied: {}",
                    e
                );
                ctx.trace(TraceEvent::EffectFulfillError {
                    key: ctx.key().clone(),
                    requirement_id: requirement_id.clone(),
                    phase: FulfillErrorPhase::Apply,
                    message: e.to_string(),
                });
                apply_failure = Some(e.to_string());
            }
        }
    }

    if let Some(error) = &effect_error {
        debug!(
            key = %ctx.key(),
            requirement_id = %requirement_id,
            code = %error.code,
            "Effect reported failure"
        );
        ctx.trace(TraceEvent::EffectFulfillError {
            key: ctx.key().clone(),
            requirement_id: requirement_id.clone(),
            phase: FulfillErrorPhase::Effect,
            message: error.to_string(),
        });
    }

    // 3. Clear
    if let Err(e) = ctx.clear_requirement(&requirement_id) {
        ctx.escalate_to_fatal(
            &intent_id,
            format!("failed to clear requirement {}: {}", requirement_id, e),
        );
        return JobOutcome::Fatal;
    }

    // 4. Record
    let errors = failure_entries(
        ctx,
        &requirement,
        &intent_id,
        apply_failure,
        effect_error.as_ref(),
    );
    if let Err(e) = ctx.record_errors(errors) {
        warn!(
            key = %ctx.key(),
            requirement_id = %requirement_id,
            "Failed to record effect error: {}",
            e
        );
        ctx.trace(TraceEvent::EffectFulfillError {
            key: ctx.key().clone(),
            requirement_id: requirement_id.clone(),
            phase: FulfillErrorPhase::Record,
            message: e.to_string(),
        });
    }

    // 5. Continue
    let iteration = ctx.next_iteration(&intent_id);
    ctx.enqueue(Job::ContinueCompute {
        intent_id: intent_id.clone(),
        iteration,
        intent,
    });
    ctx.trace(TraceEvent::ContinueEnqueue {
        key: ctx.key().clone(),
        intent_id,
        iteration,
    });

    JobOutcome::Continued
}

fn failure_entries(
    ctx: &ExecutionContext,
    requirement: &Requirement,
    intent_id: &str,
    apply_failure: Option<String>,
    effect_error: Option<&EffectError>,
) -> Vec<ErrorValue> {
    let source = ErrorSource {
        action_id: requirement.action_id.clone(),
        node_path: requirement.flow_position.node_path.clone(),
    };
    let mut context = json!({
        "intentId": intent_id,
        "requirementId": requirement.id,
        "effectType": requirement.effect_type,
    });

    let mut entries = Vec::new();
    if let Some(message) = apply_failure {
        entries.push(error_value(
            ctx,
            codes::EFFECT_APPLY_FAILED,
            message,
            source.clone(),
            Some(context.clone()),
        ));
    }
    if let Some(error) = effect_error {
        context["effectErrorCode"] = json!(error.code);
        entries.push(error_value(
            ctx,
            codes::EFFECT_EXECUTION_FAILED,
            error.message.clone(),
            source,
            Some(context),
        ));
    }
    entries
}
