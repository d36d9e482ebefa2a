// src/utils/mod.rs
//! Common utilities shared by every engine module
//!
//! - **Config**: Layered engine configuration (defaults, file, environment)
//! - **Errors**: Crate-wide error type and `Result` alias

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
