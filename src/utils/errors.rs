// src/utils/errors.rs
//! Engine error types

use crate::core::CoreError;
use crate::runtime::mailbox::ExecutionKey;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine to its owning layer
#[derive(Debug, Error)]
pub enum EngineError {
    /// The external Core rejected a compute, apply or system update
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A requirement id is not in `pendingRequirements`
    #[error("requirement {0} is not pending")]
    RequirementNotPending(String),

    /// No execution context exists for the key
    #[error("unknown execution key: {0}")]
    UnknownKey(ExecutionKey),

    /// The key was escalated to fatal and no longer accepts work
    #[error("execution key {0} is halted after fatal escalation")]
    KeyHalted(ExecutionKey),

    /// The key has an active drain or queued jobs and cannot be torn down
    #[error("execution key {0} is busy draining")]
    KeyBusy(ExecutionKey),

    /// The key was torn down while the submission was in progress
    #[error("execution key {0} was torn down")]
    KeyTornDown(ExecutionKey),

    /// The key did not reach quiescence in time
    #[error("execution key {key} did not settle within {timeout_ms}ms")]
    SettleTimeout { key: ExecutionKey, timeout_ms: u64 },

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Trace export failure
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Logging or metrics initialisation failure
    #[error("observability error: {0}")]
    Observability(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
