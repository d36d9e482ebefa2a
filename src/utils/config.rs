// src/utils/config.rs
//! Layered engine configuration
//!
//! Sources, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. `host-engine.{toml,yaml,json}` in the working directory (optional),
//!    or an explicit file passed to [`EngineConfig::load_from`]
//! 3. Environment variables prefixed `HOST_ENGINE__`, with `__` separating
//!    sections (e.g. `HOST_ENGINE__EFFECTS__DEFAULT_TIMEOUT_MS=5000`)

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default config file stem looked up in the working directory
pub const DEFAULT_CONFIG_NAME: &str = "host-engine";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HOST_ENGINE";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub effects: EffectConfig,
    pub trace: TraceConfig,
    pub observability: ObservabilityConfig,
}

/// Job loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on `ContinueCompute` iterations for one intent
    pub max_continue_iterations: u32,

    /// Default wait used by `Host::settle`
    pub settle_timeout_ms: u64,

    /// Finished intent slots kept per key for `Host::intent_status`
    pub retained_finished_slots: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_continue_iterations: 1000,
            settle_timeout_ms: 30_000,
            retained_finished_slots: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

/// Effect executor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EffectConfig {
    /// Timeout applied to handlers without an override
    pub default_timeout_ms: u64,

    /// Attempts per requirement, including the first one
    pub max_attempts: u32,

    /// Fixed pause between retry attempts
    pub retry_backoff_ms: u64,

    /// Handlers allowed to run at once across all keys
    pub max_concurrent: usize,

    /// Per effect type timeout overrides (milliseconds)
    pub timeouts: HashMap<String, u64>,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_attempts: 1,
            retry_backoff_ms: 100,
            max_concurrent: 256,
            timeouts: HashMap::new(),
        }
    }
}

impl EffectConfig {
    /// Timeout for a given effect type
    pub fn timeout_for(&self, effect_type: &str) -> Duration {
        let ms = self
            .timeouts
            .get(effect_type)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Trace pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceConfig {
    /// Capacity of the in-memory trace buffer
    pub buffer_capacity: usize,

    /// Mirror every trace event into `tracing` at TRACE level
    pub log_events: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 65_536,
            log_events: false,
        }
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit logs as JSON lines
    pub json_logs: bool,

    /// Install the Prometheus recorder
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, optional `host-engine.*` file and
    /// environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false));
        Self::finish(builder)
    }

    /// Load configuration with an explicit file in place of the default lookup
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_continue_iterations == 0 {
            return Err(EngineError::Config(
                "runtime.max_continue_iterations must be at least 1".to_string(),
            ));
        }
        if self.runtime.settle_timeout_ms == 0 {
            return Err(EngineError::Config(
                "runtime.settle_timeout_ms cannot be 0".to_string(),
            ));
        }
        if self.effects.max_attempts == 0 {
            return Err(EngineError::Config(
                "effects.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.effects.default_timeout_ms == 0 {
            return Err(EngineError::Config(
                "effects.default_timeout_ms cannot be 0".to_string(),
            ));
        }
        if let Some((effect_type, _)) = self.effects.timeouts.iter().find(|(_, ms)| **ms == 0) {
            return Err(EngineError::Config(format!(
                "effects.timeouts.{} cannot be 0",
                effect_type
            )));
        }
        if self.effects.max_concurrent == 0 {
            return Err(EngineError::Config(
                "effects.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.trace.buffer_capacity == 0 {
            return Err(EngineError::Config(
                "trace.buffer_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
