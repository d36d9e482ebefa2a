// src/effects/fulfillment.rs
//! Single-use fulfillment handle
//!
//! Consuming the handle (`fulfill`, `fail`, `complete`) submits exactly one
//! `FulfillEffect` job for its requirement. Dropping it unconsumed submits an
//! `EFFECT_ABANDONED` error instead, so a panicking or forgetful handler
//! still lets the intent make progress.

use crate::core::{Intent, Patch};
use crate::effects::EffectError;
use crate::runtime::job::Job;
use crate::runtime::mailbox::ExecutionKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Re-entry point for jobs produced outside a drain
pub trait JobSubmitter: Send + Sync {
    /// Enqueue `job` for `key` and make sure a drain will pick it up.
    /// Returns false if the key no longer accepts work.
    fn submit(&self, key: &ExecutionKey, job: Job) -> bool;
}

/// Handle to deliver the result of one dispatched requirement
pub struct FulfillmentHandle {
    key: ExecutionKey,
    intent: Intent,
    requirement_id: String,
    submitter: Weak<dyn JobSubmitter>,

    /// Outstanding-effect counter of the owning context
    in_flight: Arc<AtomicUsize>,

    done: bool,
}

impl FulfillmentHandle {
    /// Create a handle; increments `in_flight` until the handle is consumed
    pub fn new(
        key: ExecutionKey,
        intent: Intent,
        requirement_id: impl Into<String>,
        submitter: Weak<dyn JobSubmitter>,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            key,
            intent,
            requirement_id: requirement_id.into(),
            submitter,
            in_flight,
            done: false,
        }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn requirement_id(&self) -> &str {
        &self.requirement_id
    }

    pub fn intent_id(&self) -> &str {
        &self.intent.intent_id
    }

    /// Deliver result patches
    pub fn fulfill(mut self, patches: Vec<Patch>) {
        self.deliver(patches, None);
    }

    /// Deliver an effect failure
    pub fn fail(mut self, error: EffectError) {
        self.deliver(Vec::new(), Some(error));
    }

    pub fn complete(self, result: Result<Vec<Patch>, EffectError>) {
        match result {
            Ok(patches) => self.fulfill(patches),
            Err(error) => self.fail(error),
        }
    }

    fn deliver(&mut self, patches: Vec<Patch>, error: Option<EffectError>) {
        if self.done {
            return;
        }
        self.done = true;

        let job = Job::FulfillEffect {
            requirement_id: self.requirement_id.clone(),
            result_patches: patches,
            effect_error: error,
            intent_id: self.intent.intent_id.clone(),
            intent: self.intent.clone(),
        };

        let accepted = match self.submitter.upgrade() {
            Some(submitter) => submitter.submit(&self.key, job),
            None => false,
        };
        if accepted {
            debug!(key = %self.key, requirement_id = %self.requirement_id, "fulfillment submitted");
        } else {
            warn!(
                key = %self.key,
                requirement_id = %self.requirement_id,
                "fulfillment discarded: key no longer accepts work"
            );
        }

        // Decrement only after the job is queued so quiescence checks never
        // see an empty mailbox with the result still in flight
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for FulfillmentHandle {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                key = %self.key,
                requirement_id = %self.requirement_id,
                "fulfillment handle dropped unconsumed"
            );
            self.deliver(Vec::new(), Some(EffectError::abandoned()));
        }
    }
}

impl std::fmt::Debug for FulfillmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentHandle")
            .field("key", &self.key)
            .field("requirement_id", &self.requirement_id)
            .field("done", &self.done)
            .finish()
    }
}
