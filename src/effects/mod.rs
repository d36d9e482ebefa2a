// src/effects/mod.rs
//! Effect runner contract and the in-process executor
//!
//! The engine hands every dispatched requirement to an [`EffectRunner`]
//! together with a [`FulfillmentHandle`]. The handle is the only way back
//! into the key's mailbox and yields exactly one `FulfillEffect` job.
//!
//! - **Fulfillment**: Single-use re-entry handle
//! - **Handler**: Async effect handler trait and closure adapter
//! - **Registry**: Effect type → handler mapping
//! - **Executor**: Spawning runner with timeouts, retries and a concurrency cap
//!
//! # Architecture
//!
//! ```text
//! ContinueCompute ── dispatch(request, handle) ──► EffectExecutor
//!                                                      │ spawn
//!                                                      ▼
//!                                         HandlerRegistry::get(type)
//!                                                      │ timeout / retry
//!                                                      ▼
//!                          handle.complete(result) ──► mailbox: FulfillEffect
//! ```

pub mod executor;
pub mod fulfillment;
pub mod handler;
pub mod registry;

pub use executor::{EffectExecutor, EffectStats};
pub use fulfillment::{FulfillmentHandle, JobSubmitter};
pub use handler::{handler_fn, EffectHandler, FnHandler};
pub use registry::HandlerRegistry;

use crate::core::Intent;
use crate::runtime::mailbox::ExecutionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Error codes produced by the engine's own effect plumbing
pub mod codes {
    pub const UNKNOWN_EFFECT: &str = "UNKNOWN_EFFECT";
    pub const EFFECT_TIMEOUT: &str = "EFFECT_TIMEOUT";
    pub const EFFECT_CANCELLED: &str = "EFFECT_CANCELLED";
    pub const EFFECT_ABANDONED: &str = "EFFECT_ABANDONED";
    pub const RUNTIME_UNAVAILABLE: &str = "EFFECT_RUNTIME_UNAVAILABLE";
    pub const HANDLER_FAILED: &str = "EFFECT_HANDLER_FAILED";
}

/// Failure reported for an effect
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct EffectError {
    pub code: String,
    pub message: String,

    /// Whether the executor may retry the handler
    #[serde(default)]
    pub retryable: bool,
}

impl EffectError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Generic handler failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(codes::HANDLER_FAILED, message)
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn unknown_effect(effect_type: &str) -> Self {
        Self::new(
            codes::UNKNOWN_EFFECT,
            format!("no handler registered for effect type '{}'", effect_type),
        )
    }

    pub fn timeout(effect_type: &str, after: Duration) -> Self {
        Self::new(
            codes::EFFECT_TIMEOUT,
            format!("effect '{}' timed out after {}ms", effect_type, after.as_millis()),
        )
        .retryable()
    }

    pub fn cancelled() -> Self {
        Self::new(codes::EFFECT_CANCELLED, "effect executor shut down")
    }

    pub fn abandoned() -> Self {
        Self::new(
            codes::EFFECT_ABANDONED,
            "fulfillment handle dropped without a result",
        )
    }
}

/// Everything a runner needs to execute one requirement
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRequest {
    pub key: ExecutionKey,
    pub intent_id: String,
    pub requirement_id: String,
    pub effect_type: String,
    pub params: Value,
    pub intent: Intent,
}

/// External collaborator executing dispatched requirements
///
/// `dispatch` must not block. The runner owns timeouts and retries and must
/// eventually consume `handle` (or drop it, which reports an abandoned
/// effect).
pub trait EffectRunner: Send + Sync {
    fn dispatch(&self, request: EffectRequest, handle: FulfillmentHandle);
}
