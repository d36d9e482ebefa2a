// src/trace/sink.rs
//! Trace emission
//!
//! [`Tracer`] stamps events with a sequence number and timestamp and hands
//! them to a [`TraceSink`]. Emission is append-only and infallible: sinks
//! swallow their own failures.

use crate::trace::events::{TraceEvent, TraceRecord};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Destination for trace records
pub trait TraceSink: Send + Sync {
    fn record(&self, record: &TraceRecord);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _record: &TraceRecord) {}
}

/// Mirrors trace records into `tracing` at TRACE level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, record: &TraceRecord) {
        match serde_json::to_string(&record.event) {
            Ok(json) => tracing::trace!(
                target: "host_engine::trace",
                seq = record.seq,
                event = record.event.name(),
                key = %record.event.key(),
                "{}",
                json
            ),
            Err(_) => tracing::trace!(
                target: "host_engine::trace",
                seq = record.seq,
                event = record.event.name(),
                "unserializable trace event"
            ),
        }
    }
}

/// Forwards every record to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TraceSink for FanoutSink {
    fn record(&self, record: &TraceRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

/// Cheap, cloneable trace emitter shared by runner, contexts and handlers
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    seq: Arc<AtomicU64>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            sink,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Emit an event
    pub fn emit(&self, event: TraceEvent) {
        let record = TraceRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            event,
        };
        self.sink.record(&record);
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectSink(Mutex<Vec<TraceRecord>>);

    impl TraceSink for CollectSink {
        fn record(&self, record: &TraceRecord) {
            self.0.lock().push(record.clone());
        }
    }

    #[test]
    fn test_tracer_sequences_events() {
        let sink = Arc::new(CollectSink::default());
        let tracer = Tracer::new(sink.clone());

        tracer.emit(TraceEvent::RunnerStart { key: "a".into() });
        tracer.clone().emit(TraceEvent::RunnerEnd {
            key: "a".into(),
            jobs_processed: 0,
        });

        let records = sink.0.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 0);
        assert_eq!(records[1].seq, 1);
        assert_eq!(records[1].event.name(), "runner:end");
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(CollectSink::default());
        let b = Arc::new(CollectSink::default());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(LogSink));
        assert_eq!(fanout.len(), 3);

        let tracer = Tracer::new(Arc::new(fanout));
        tracer.emit(TraceEvent::RunnerStart { key: "a".into() });

        assert_eq!(a.0.lock().len(), 1);
        assert_eq!(b.0.lock().len(), 1);
    }
}
