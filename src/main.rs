// src/main.rs
//! Host Engine demo
//!
//! Runs a handful of fetch-style intents through the engine with an
//! in-process `http` effect handler, then reports the settled snapshots,
//! trace compliance and Prometheus metrics.

use anyhow::Result;
use async_trait::async_trait;
use host_engine::core::{
    apply_patches, ComputeResult, ComputeStatus, Core, CoreError, FlowPosition, Requirement,
    SystemStatus,
};
use host_engine::effects::{handler_fn, EffectRequest};
use host_engine::observability::{init_metrics, init_tracing};
use host_engine::runtime::HostContext;
use host_engine::trace::{ComplianceChecker, ExportFormat, Exporter, TraceBuffer};
use host_engine::{
    BuildInfo, EffectExecutor, EngineConfig, ExecutionKey, HandlerRegistry, Host, Intent, Patch,
    Schema, Snapshot,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Minimal Core: one `http` requirement per fetch intent, complete once a
/// response is present
struct FetchCore;

#[async_trait]
impl Core for FetchCore {
    async fn compute(
        &self,
        schema: &Schema,
        snapshot: &Snapshot,
        intent: &Intent,
        ctx: &HostContext,
    ) -> std::result::Result<ComputeResult, CoreError> {
        if intent.intent_type != "fetch" {
            return Err(CoreError::Compute(format!(
                "unknown intent type '{}'",
                intent.intent_type
            )));
        }

        let mut next = snapshot.clone();
        next.meta.schema_hash = schema.hash.clone();

        if snapshot.get("response").is_some() {
            return Ok(ComputeResult {
                status: ComputeStatus::Complete,
                snapshot: next,
                requirements: vec![],
            });
        }
        if !snapshot.system.errors.is_empty() {
            return Ok(ComputeResult {
                status: ComputeStatus::Error,
                snapshot: next,
                requirements: vec![],
            });
        }

        let url = intent
            .input
            .as_ref()
            .and_then(|input| input.get("url"))
            .cloned()
            .unwrap_or_else(|| json!("https://example.invalid"));
        let requirement = Requirement {
            id: format!("req-{}-{}", intent.intent_id, snapshot.meta.version),
            effect_type: "http".to_string(),
            params: json!({ "url": url }),
            action_id: intent.intent_type.clone(),
            flow_position: FlowPosition {
                node_path: "actions.fetch.effect".to_string(),
                snapshot_version: snapshot.meta.version,
            },
            created_at: ctx.now,
        };
        next.system.status = SystemStatus::Pending;
        next.system.pending_requirements.push(requirement.clone());

        Ok(ComputeResult {
            status: ComputeStatus::Pending,
            snapshot: next,
            requirements: vec![requirement],
        })
    }

    fn apply(
        &self,
        _schema: &Schema,
        snapshot: &Snapshot,
        patches: &[Patch],
        ctx: &HostContext,
    ) -> std::result::Result<Snapshot, CoreError> {
        apply_patches(snapshot, patches, ctx)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration, falling back to defaults
    let config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration ({}), using defaults", e);
            EngineConfig::default()
        }
    };

    // Initialize observability (logging, metrics)
    init_tracing(&config.observability)?;
    let metrics = if config.observability.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let build = BuildInfo::current();
    info!(
        git_hash = build.git_hash,
        rustc = build.rustc_version,
        "Starting Host Engine demo v{}",
        build.version
    );

    let registry = HandlerRegistry::new().with(
        "http",
        handler_fn(|request: EffectRequest| async move {
            let url = request.params["url"].clone();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![Patch::set(
                "response",
                json!({ "url": url, "data": "fetched" }),
            )])
        }),
    );
    let executor = Arc::new(EffectExecutor::new(
        Arc::new(registry),
        config.effects.clone(),
    ));
    let buffer = Arc::new(TraceBuffer::new(config.trace.buffer_capacity));

    let host = Host::builder(Arc::new(FetchCore))
        .schema(Schema::new("demo-v1"))
        .effects(executor.clone())
        .trace_sink(buffer.clone())
        .config(config.clone())
        .on_fatal(|escalation| {
            error!(
                key = %escalation.key,
                intent_id = %escalation.intent_id,
                "Key halted: {}",
                escalation.message
            );
        })
        .build()?;

    let keys: Vec<ExecutionKey> = (1..=3)
        .map(|i| ExecutionKey::new(format!("world-{}", i)))
        .collect();
    for (i, key) in keys.iter().enumerate() {
        let intent = Intent::new("fetch")
            .with_input(json!({ "url": format!("https://api.example.test/items/{}", i + 1) }));
        host.dispatch(key.clone(), intent)?;
    }

    for key in &keys {
        let snapshot = host.settle(key).await?;
        info!(
            key = %key,
            version = snapshot.meta.version,
            status = ?snapshot.system.status,
            "Settled: {}",
            serde_json::to_string(&snapshot.data)?
        );
    }
    executor.shutdown();

    // Trace compliance
    let records = buffer.drain();
    let report = ComplianceChecker::new().check(&records);
    info!(
        events = report.events_checked,
        violations = report.violations.len(),
        dropped = buffer.stats().drop_count,
        "Trace compliance checked"
    );
    for violation in &report.violations {
        warn!(
            key = %violation.key,
            seq = violation.seq,
            code = violation.code.as_str(),
            "{}",
            violation.message
        );
    }

    let junit = Exporter::new(ExportFormat::JUnit).export(&records)?;
    debug!("Compliance report:\n{}", junit);

    let stats = host.runner_stats();
    info!(
        drains = stats.drains,
        rechecks = stats.rechecks,
        jobs = stats.jobs_processed,
        "Runner statistics"
    );

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }

    info!("Host Engine demo finished");
    Ok(())
}
