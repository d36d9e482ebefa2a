// src/runtime/handlers/continue_compute.rs
//! ContinueCompute: one step of the intent state machine
//!
//! ```text
//! iteration > limit ──► record HOST_LOOP_LIMIT, slot failed
//! compute ─┬─ Err              ──► record COMPUTE_FAILED, slot failed
//!          ├─ complete / error ──► slot finished
//!          ├─ pending + reqs   ──► effect:dispatch × n
//!          └─ pending, no reqs ──► enqueue ContinueCompute{iteration + 1}
//! ```

use super::{codes, error_value};
use crate::core::{ComputeStatus, ErrorSource, Intent};
use crate::runtime::context::{ExecutionContext, SlotStatus};
use crate::runtime::job::{Job, JobOutcome};
use crate::trace::TraceEvent;
use serde_json::json;
use tracing::{debug, warn};

pub async fn handle(
    ctx: &ExecutionContext,
    intent_id: String,
    iteration: u32,
    intent: Intent,
) -> JobOutcome {
    let frozen = ctx.get_frozen_context(Some(&intent_id));

    if iteration > ctx.max_continue_iterations() {
        warn!(
            key = %ctx.key(),
            intent_id = %intent_id,
            iteration,
            "Intent exceeded the continue iteration limit"
        );
        let error = error_value(
            ctx,
            codes::HOST_LOOP_LIMIT,
            format!(
                "intent {} exceeded {} compute iterations",
                intent_id,
                ctx.max_continue_iterations()
            ),
            ErrorSource::default(),
            Some(json!({ "intentId": intent_id, "iteration": iteration })),
        );
        if let Err(e) = ctx.record_errors(vec![error]) {
            warn!(key = %ctx.key(), intent_id = %intent_id, "Failed to record loop limit: {}", e);
        }
        ctx.finish_slot(&intent_id, SlotStatus::Failed, frozen.now);
        return JobOutcome::Failed;
    }

    let snapshot = ctx.get_snapshot();
    let result = match ctx
        .core()
        .compute(ctx.schema(), &snapshot, &intent, &frozen)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!(key = %ctx.key(), intent_id = %intent_id, iteration, "Compute failed: {}", e);
            let error = error_value(
                ctx,
                codes::COMPUTE_FAILED,
                e.to_string(),
                ErrorSource::default(),
                Some(json!({ "intentId": intent_id, "iteration": iteration })),
            );
            if let Err(e) = ctx.record_errors(vec![error]) {
                warn!(key = %ctx.key(), intent_id = %intent_id, "Failed to record compute error: {}", e);
            }
            ctx.finish_slot(&intent_id, SlotStatus::Failed, frozen.now);
            return JobOutcome::Failed;
        }
    };

    let status = result.status;
    let requirements = result.requirements;
    ctx.set_snapshot(result.snapshot);
    ctx.note_compute(&intent_id, status);
    ctx.trace(TraceEvent::CoreCompute {
        key: ctx.key().clone(),
        intent_id: intent_id.clone(),
        iteration,
        status,
        requirement_count: requirements.len(),
    });

    if status.is_terminal() {
        debug!(key = %ctx.key(), intent_id = %intent_id, status = status.as_str(), "Intent finished");
        let slot_status = match status {
            ComputeStatus::Complete => SlotStatus::Completed,
            _ => SlotStatus::Failed,
        };
        ctx.finish_slot(&intent_id, slot_status, frozen.now);
        return JobOutcome::Terminal;
    }

    if !requirements.is_empty() {
        for requirement in &requirements {
            ctx.trace(TraceEvent::EffectDispatch {
                key: ctx.key().clone(),
                intent_id: intent_id.clone(),
                requirement_id: requirement.id.clone(),
                effect_type: requirement.effect_type.clone(),
            });
            ctx.request_effect_execution(
                &intent_id,
                &requirement.id,
                &requirement.effect_type,
                &requirement.params,
                &intent,
            );
        }
        return JobOutcome::Dispatched;
    }

    // Pending with nothing to wait for: yield to the mailbox and try again
    let next = iteration + 1;
    ctx.enqueue(Job::ContinueCompute {
        intent_id: intent_id.clone(),
        iteration: next,
        intent,
    });
    ctx.trace(TraceEvent::ContinueEnqueue {
        key: ctx.key().clone(),
        intent_id,
        iteration: next,
    });
    JobOutcome::Continued
}
