// src/lib.rs
//! Host Engine Library
//!
//! Drives intents from submission to completion on a patch-based state
//! runtime, interleaving external effects safely and deterministically.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **core**: Snapshot data model and the `Core` evaluator contract
//! - **runtime**: Mailboxes, execution contexts, runner, job handlers, host
//! - **effects**: Effect runner contract, fulfillment handles, executor
//! - **trace**: Trace events, sinks, compliance checking and export
//! - **observability**: Logging and metrics setup
//! - **utils**: Configuration and error types
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use host_engine::{Host, Intent, ExecutionKey};
//! # async fn run(core: Arc<dyn host_engine::core::Core>) -> host_engine::Result<()> {
//! let host = Host::builder(core).build()?;
//! let key = ExecutionKey::from("world-1");
//!
//! host.dispatch(key.clone(), Intent::new("fetch"))?;
//! let snapshot = host.settle(&key).await?;
//! println!("version {}", snapshot.meta.version);
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod core;
pub mod effects;
pub mod observability;
pub mod runtime;
pub mod trace;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{Intent, Patch, Requirement, Schema, Snapshot};
pub use crate::effects::{EffectError, EffectExecutor, HandlerRegistry};
pub use crate::runtime::{ExecutionKey, Host, HostBuilder, Job};
pub use crate::utils::config::EngineConfig;
pub use crate::utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
