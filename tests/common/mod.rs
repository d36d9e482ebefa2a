// tests/common/mod.rs
//! Shared fixtures for end-to-end engine tests
//!
//! `ScriptedCore` understands two intent types:
//!
//! - `fetch`: raises one `http` requirement targeting `responses.<intent_id>`
//!   and completes once that path is populated (or errors once
//!   `system.errors` is non-empty)
//! - `spin`: stays pending without requirements, bumping
//!   `spins.<intent_id>` each step until `input.spins` is reached

#![allow(dead_code)]

use async_trait::async_trait;
use host_engine::core::{
    apply_patches, ComputeResult, ComputeStatus, Core, CoreError, FlowPosition, Requirement,
    SystemDelta, SystemStatus,
};
use host_engine::effects::{handler_fn, EffectError, EffectRequest, EffectRunner, FulfillmentHandle};
use host_engine::runtime::{FatalEscalation, FixedContextProvider, HostContext};
use host_engine::trace::{FanoutSink, TraceBuffer, TraceEvent, TraceRecord, TraceSink};
use host_engine::{
    EffectExecutor, EngineConfig, ExecutionKey, HandlerRegistry, Host, Intent, Patch, Schema,
    Snapshot,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const SCHEMA_HASH: &str = "schema-test";
pub const SETTLE: Duration = Duration::from_secs(5);

pub fn response_path(intent_id: &str) -> String {
    format!("responses.{}", intent_id)
}

fn spin_path(intent_id: &str) -> String {
    format!("spins.{}", intent_id)
}

/// Deterministic test Core
#[derive(Debug, Default)]
pub struct ScriptedCore {
    /// Fail every `apply_system` call that removes a requirement
    pub fail_clear: bool,
}

impl ScriptedCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_clear() -> Self {
        Self { fail_clear: true }
    }

    fn fetch(&self, snapshot: &Snapshot, intent: &Intent, ctx: &HostContext) -> ComputeResult {
        let target = response_path(&intent.intent_id);
        let mut next = snapshot.clone();

        if snapshot.get(&target).is_some() {
            return ComputeResult {
                status: ComputeStatus::Complete,
                snapshot: next,
                requirements: vec![],
            };
        }
        if !snapshot.system.errors.is_empty() {
            return ComputeResult {
                status: ComputeStatus::Error,
                snapshot: next,
                requirements: vec![],
            };
        }

        let prefix = format!("req-{}-", intent.intent_id);
        if snapshot
            .system
            .pending_requirements
            .iter()
            .any(|r| r.id.starts_with(&prefix))
        {
            return ComputeResult {
                status: ComputeStatus::Pending,
                snapshot: next,
                requirements: vec![],
            };
        }

        let url = intent
            .input
            .as_ref()
            .and_then(|input| input.get("url"))
            .cloned()
            .unwrap_or_else(|| json!("https://example.test"));
        let requirement = Requirement {
            id: format!("{}{}", prefix, snapshot.meta.version),
            effect_type: "http".to_string(),
            params: json!({ "url": url, "target": target }),
            action_id: intent.intent_type.clone(),
            flow_position: FlowPosition {
                node_path: "actions.fetch.effect".to_string(),
                snapshot_version: snapshot.meta.version,
            },
            created_at: ctx.now,
        };
        next.system.status = SystemStatus::Pending;
        next.system.pending_requirements.push(requirement.clone());

        ComputeResult {
            status: ComputeStatus::Pending,
            snapshot: next,
            requirements: vec![requirement],
        }
    }

    fn spin(
        &self,
        snapshot: &Snapshot,
        intent: &Intent,
        ctx: &HostContext,
    ) -> Result<ComputeResult, CoreError> {
        let target = intent
            .input
            .as_ref()
            .and_then(|input| input.get("spins"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1);
        let path = spin_path(&intent.intent_id);
        let done = snapshot.get(&path).and_then(|v| v.as_u64()).unwrap_or(0);

        if done >= target {
            return Ok(ComputeResult {
                status: ComputeStatus::Complete,
                snapshot: snapshot.clone(),
                requirements: vec![],
            });
        }

        let next = apply_patches(snapshot, &[Patch::set(path, json!(done + 1))], ctx)?;
        Ok(ComputeResult {
            status: ComputeStatus::Pending,
            snapshot: next,
            requirements: vec![],
        })
    }
}

#[async_trait]
impl Core for ScriptedCore {
    async fn compute(
        &self,
        _schema: &Schema,
        snapshot: &Snapshot,
        intent: &Intent,
        ctx: &HostContext,
    ) -> Result<ComputeResult, CoreError> {
        match intent.intent_type.as_str() {
            "fetch" => Ok(self.fetch(snapshot, intent, ctx)),
            "spin" => self.spin(snapshot, intent, ctx),
            other => Err(CoreError::Compute(format!("unknown intent type '{}'", other))),
        }
    }

    fn apply(
        &self,
        _schema: &Schema,
        snapshot: &Snapshot,
        patches: &[Patch],
        ctx: &HostContext,
    ) -> Result<Snapshot, CoreError> {
        apply_patches(snapshot, patches, ctx)
    }

    fn apply_system(
        &self,
        snapshot: &Snapshot,
        delta: &SystemDelta,
        ctx: &HostContext,
    ) -> Result<Snapshot, CoreError> {
        if self.fail_clear && !delta.remove_requirements.is_empty() {
            return Err(CoreError::Store("requirement store unavailable".to_string()));
        }
        Ok(delta.apply_to(snapshot, ctx))
    }
}

/// Registry whose `http` handler writes `{data: "fetched"}` to the
/// requirement's target path
pub fn fetch_registry() -> HandlerRegistry {
    HandlerRegistry::new().with(
        "http",
        handler_fn(|request: EffectRequest| async move {
            let target = request.params["target"]
                .as_str()
                .unwrap_or("response")
                .to_string();
            Ok(vec![Patch::set(target, json!({ "data": "fetched" }))])
        }),
    )
}

/// Registry whose `http` handler always fails with "boom"
pub fn boom_registry() -> HandlerRegistry {
    HandlerRegistry::new().with(
        "http",
        handler_fn(|_request: EffectRequest| async move { Err(EffectError::failed("boom")) }),
    )
}

/// Effect runner that parks every dispatch until the test delivers it
#[derive(Default)]
pub struct HeldEffects {
    held: Mutex<Vec<(EffectRequest, FulfillmentHandle)>>,
}

impl HeldEffects {
    pub fn take(&self) -> Vec<(EffectRequest, FulfillmentHandle)> {
        std::mem::take(&mut *self.held.lock())
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }
}

impl EffectRunner for HeldEffects {
    fn dispatch(&self, request: EffectRequest, handle: FulfillmentHandle) {
        self.held.lock().push((request, handle));
    }
}

/// Records every `status`/`pendingRequirements` mismatch observed at a
/// `job:end`
#[derive(Default)]
pub struct CoherenceSink {
    host: OnceLock<Host>,
    checked: AtomicUsize,
    violations: Mutex<Vec<String>>,
}

impl CoherenceSink {
    pub fn attach(&self, host: &Host) {
        let _ = self.host.set(host.clone());
    }

    pub fn checked(&self) -> usize {
        self.checked.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }
}

impl TraceSink for CoherenceSink {
    fn record(&self, record: &TraceRecord) {
        let TraceEvent::JobEnd { key, job_id, .. } = &record.event else {
            return;
        };
        let Some(host) = self.host.get() else {
            return;
        };
        if let Some(snapshot) = host.snapshot(key) {
            self.checked.fetch_add(1, Ordering::SeqCst);
            if !snapshot.system.is_coherent() {
                self.violations.lock().push(format!(
                    "job {} on {}: status {:?} with {} pending",
                    job_id,
                    key,
                    snapshot.system.status,
                    snapshot.system.pending_requirements.len()
                ));
            }
        }
    }
}

/// Counts and keeps fatal escalations
#[derive(Default)]
pub struct FatalLog {
    escalations: Mutex<Vec<FatalEscalation>>,
}

impl FatalLog {
    pub fn record(&self, escalation: &FatalEscalation) {
        self.escalations.lock().push(escalation.clone());
    }

    pub fn all(&self) -> Vec<FatalEscalation> {
        self.escalations.lock().clone()
    }
}

pub struct Harness {
    pub host: Host,
    pub buffer: Arc<TraceBuffer>,
    pub fatals: Arc<FatalLog>,
}

impl Harness {
    pub fn events(&self) -> Vec<TraceRecord> {
        self.buffer.drain()
    }

    pub async fn settle(&self, key: &ExecutionKey) -> Snapshot {
        self.host
            .settle_within(key, SETTLE)
            .await
            .expect("key settles")
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.runtime.max_continue_iterations = 50;
    config.effects.default_timeout_ms = 2_000;
    config
}

/// Host with a fixed clock, a trace buffer and an effect runner of choice
pub fn harness_with(
    core: ScriptedCore,
    effects: Arc<dyn EffectRunner>,
    config: EngineConfig,
) -> Harness {
    build(core, effects, config, None)
}

/// Like [`harness`], with a [`CoherenceSink`] watching every job
pub fn observed_harness(core: ScriptedCore, registry: HandlerRegistry) -> (Harness, Arc<CoherenceSink>) {
    let config = config();
    let executor = Arc::new(EffectExecutor::new(Arc::new(registry), config.effects.clone()));
    let coherence = Arc::new(CoherenceSink::default());
    let extra: Arc<dyn TraceSink> = coherence.clone();
    let harness = build(core, executor, config, Some(extra));
    coherence.attach(&harness.host);
    (harness, coherence)
}

fn build(
    core: ScriptedCore,
    effects: Arc<dyn EffectRunner>,
    config: EngineConfig,
    extra: Option<Arc<dyn TraceSink>>,
) -> Harness {
    let buffer = Arc::new(TraceBuffer::new(16_384));
    let fatals = Arc::new(FatalLog::default());
    let log = Arc::clone(&fatals);

    let sink: Arc<dyn TraceSink> = match extra {
        Some(extra) => Arc::new(FanoutSink::new().with(buffer.clone()).with(extra)),
        None => buffer.clone(),
    };

    let host = Host::builder(Arc::new(core))
        .schema(Schema::new(SCHEMA_HASH))
        .effects(effects)
        .context_provider(Arc::new(FixedContextProvider::new(1_000, "seed").with_step(1)))
        .trace_sink(sink)
        .config(config)
        .on_fatal(move |escalation| log.record(escalation))
        .build()
        .expect("host builds");

    Harness { host, buffer, fatals }
}

/// Host whose effects run through an `EffectExecutor` over `registry`
pub fn harness(core: ScriptedCore, registry: HandlerRegistry) -> Harness {
    let config = config();
    let executor = Arc::new(EffectExecutor::new(Arc::new(registry), config.effects.clone()));
    harness_with(core, executor, config)
}

pub fn names(records: &[TraceRecord]) -> Vec<&'static str> {
    records.iter().map(|r| r.event.name()).collect()
}

pub fn count(records: &[TraceRecord], name: &str) -> usize {
    records.iter().filter(|r| r.event.name() == name).count()
}

pub fn fetch(intent_id: &str) -> Intent {
    Intent::new("fetch")
        .with_id(intent_id)
        .with_input(json!({ "url": "https://api.example.test/items/1" }))
}

/// Poll `cond` until it holds or `SETTLE` elapses
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
