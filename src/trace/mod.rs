// src/trace/mod.rs
//! Structured lifecycle tracing
//!
//! Trace events are distinct from logs: they form an ordered, typed record
//! of everything the engine did, consumed by compliance tooling and tests.
//!
//! - **Events**: The `area:step` event taxonomy
//! - **Sink**: `Tracer` plus pluggable sinks (noop, log bridge, fanout)
//! - **Buffer**: Bounded lock-free in-memory sink
//! - **Compliance**: Invariant checker over a recorded trace
//! - **Export**: JSON, JSON lines and JUnit renderings
//!
//! # Architecture
//!
//! ```text
//! Runner / Context / Handlers
//!            │ emit(TraceEvent)
//!            ▼
//!         Tracer ── seq + timestamp ──► TraceSink
//!                                        ├─ TraceBuffer ──► ComplianceChecker / Exporter
//!                                        └─ LogSink ──► tracing
//! ```

pub mod buffer;
pub mod compliance;
pub mod events;
pub mod export;
pub mod sink;

pub use buffer::{BufferStats, TraceBuffer};
pub use compliance::{ComplianceChecker, ComplianceReport, Severity, Violation, ViolationCode};
pub use events::{DropReason, FulfillErrorPhase, PatchSource, TraceEvent, TraceRecord};
pub use export::{ExportFormat, Exporter};
pub use sink::{FanoutSink, LogSink, NoopSink, TraceSink, Tracer};
