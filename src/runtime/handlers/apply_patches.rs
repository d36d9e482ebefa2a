// src/runtime/handlers/apply_patches.rs
//! ApplyPatches: externally sourced patches outside the compute loop

use crate::core::Patch;
use crate::runtime::context::ExecutionContext;
use crate::runtime::job::JobOutcome;
use crate::trace::PatchSource;
use tracing::{debug, warn};

pub fn handle(ctx: &ExecutionContext, patches: Vec<Patch>, source: String) -> JobOutcome {
    debug!(key = %ctx.key(), source = %source, count = patches.len(), "Applying external patches");

    match ctx.apply_patches(&patches, PatchSource::External(source.clone())) {
        Ok(()) => JobOutcome::Completed,
        Err(e) => {
            warn!(key = %ctx.key(), source = %source, "External patches rejected: {}", e);
            JobOutcome::Failed
        }
    }
}
