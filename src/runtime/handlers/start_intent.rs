// src/runtime/handlers/start_intent.rs
//! StartIntent: seed the context and schedule the first compute step

use crate::core::{Intent, Snapshot};
use crate::runtime::context::{ExecutionContext, IntentSlot};
use crate::runtime::job::{Job, JobOutcome};
use crate::trace::TraceEvent;
use tracing::{debug, warn};

pub fn handle(ctx: &ExecutionContext, intent: Intent, snapshot: Option<Snapshot>) -> JobOutcome {
    let intent_id = intent.intent_id.clone();
    let frozen = ctx.get_frozen_context(Some(&intent_id));

    if let Some(snapshot) = snapshot {
        ctx.set_snapshot(snapshot);
    }

    if ctx.slot(&intent_id).is_some_and(|slot| !slot.is_finished()) {
        warn!(key = %ctx.key(), intent_id = %intent_id, "Restarting an intent that is still running");
    }
    ctx.insert_slot(IntentSlot::new(intent.clone(), frozen.now));

    debug!(key = %ctx.key(), intent_id = %intent_id, intent_type = %intent.intent_type, "Starting intent");
    ctx.enqueue(Job::ContinueCompute {
        intent_id: intent_id.clone(),
        iteration: 0,
        intent,
    });
    ctx.trace(TraceEvent::ContinueEnqueue {
        key: ctx.key().clone(),
        intent_id,
        iteration: 0,
    });

    JobOutcome::Continued
}
