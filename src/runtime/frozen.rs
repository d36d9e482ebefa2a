// src/runtime/frozen.rs
//! Frozen host context for deterministic Core calls
//!
//! A [`HostContext`] is captured once per job and reused by every Core call
//! inside that job. The capture strategy is injected through
//! [`HostContextProvider`] so tests and replays can pin the clock and seed.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Deterministic run inputs for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    /// Milliseconds since epoch
    pub now: i64,

    pub random_seed: String,
}

/// Source of frozen contexts
pub trait HostContextProvider: Send + Sync {
    /// Capture the context for a job working on `intent_id` (if any)
    fn capture(&self, intent_id: Option<&str>) -> HostContext;
}

/// Wall clock plus a random seed per capture
#[derive(Debug, Default)]
pub struct SystemContextProvider;

impl HostContextProvider for SystemContextProvider {
    fn capture(&self, intent_id: Option<&str>) -> HostContext {
        let nonce: u64 = rand::thread_rng().gen();
        let random_seed = match intent_id {
            Some(id) => format!("{}:{:016x}", id, nonce),
            None => format!("{:016x}", nonce),
        };

        HostContext {
            now: Utc::now().timestamp_millis(),
            random_seed,
        }
    }
}

/// Fixed clock and seed, optionally advancing the clock on every capture
#[derive(Debug)]
pub struct FixedContextProvider {
    now: Mutex<i64>,
    step_ms: i64,
    seed: String,
}

impl FixedContextProvider {
    pub fn new(now: i64, seed: impl Into<String>) -> Self {
        Self {
            now: Mutex::new(now),
            step_ms: 0,
            seed: seed.into(),
        }
    }

    /// Advance the clock by `step_ms` after each capture
    pub fn with_step(mut self, step_ms: i64) -> Self {
        self.step_ms = step_ms;
        self
    }
}

impl HostContextProvider for FixedContextProvider {
    fn capture(&self, _intent_id: Option<&str>) -> HostContext {
        let mut now = self.now.lock();
        let ctx = HostContext {
            now: *now,
            random_seed: self.seed.clone(),
        };
        *now += self.step_ms;
        ctx
    }
}
