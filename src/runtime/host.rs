// src/runtime/host.rs
//! Host: the engine's owning facade
//!
//! Owns the mailbox manager, one [`ExecutionContext`] per key and the
//! [`Runner`]. Every submission goes through the same two steps: enqueue
//! into the key's mailbox, then kick the runner.
//!
//! # Architecture
//!
//! ```text
//!  dispatch / apply_patches            FulfillmentHandle (effect done)
//!            │                                   │
//!            └──────────► enqueue + kick ◄───────┘
//!                              │
//!                     Runner (one drain per key)
//!                              │
//!                     HostShared::process
//!                      ├─ halted? → job:end{skipped}
//!                      ├─ reset frozen context
//!                      └─ handlers::dispatch(ctx, job)
//! ```

use crate::core::{Core, Intent, Patch, Schema, Snapshot};
use crate::effects::{EffectExecutor, EffectRunner, HandlerRegistry, JobSubmitter};
use crate::observability::metric_names;
use crate::runtime::context::{
    ContextDeps, EscalationHook, ExecutionContext, FatalEscalation, IntentSlot,
};
use crate::runtime::frozen::{HostContextProvider, SystemContextProvider};
use crate::runtime::handlers;
use crate::runtime::job::{Job, JobId, JobOutcome};
use crate::runtime::mailbox::{Envelope, ExecutionKey, MailboxManager};
use crate::runtime::runner::{AbortedJob, JobProcessor, Runner, RunnerStats};
use crate::trace::{FanoutSink, LogSink, NoopSink, TraceEvent, TraceSink, Tracer};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fallback poll interval while waiting for a key to settle
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Builder for [`Host`]
pub struct HostBuilder {
    core: Arc<dyn Core>,
    schema: Schema,
    effects: Option<Arc<dyn EffectRunner>>,
    provider: Option<Arc<dyn HostContextProvider>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    config: EngineConfig,
    on_fatal: Option<EscalationHook>,
}

impl HostBuilder {
    pub fn new(core: Arc<dyn Core>) -> Self {
        Self {
            core,
            schema: Schema::new("default"),
            effects: None,
            provider: None,
            trace_sink: None,
            config: EngineConfig::default(),
            on_fatal: None,
        }
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Effect runner; defaults to an [`EffectExecutor`] with no handlers
    pub fn effects(mut self, effects: Arc<dyn EffectRunner>) -> Self {
        self.effects = Some(effects);
        self
    }

    /// Frozen-context source; defaults to [`SystemContextProvider`]
    pub fn context_provider(mut self, provider: Arc<dyn HostContextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once per key when it is escalated to fatal
    pub fn on_fatal(mut self, hook: impl Fn(&FatalEscalation) + Send + Sync + 'static) -> Self {
        self.on_fatal = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Host> {
        self.config.validate()?;

        let sink: Arc<dyn TraceSink> = match (self.trace_sink, self.config.trace.log_events) {
            (Some(sink), true) => Arc::new(FanoutSink::new().with(sink).with(Arc::new(LogSink))),
            (Some(sink), false) => sink,
            (None, true) => Arc::new(LogSink),
            (None, false) => Arc::new(NoopSink),
        };
        let tracer = Tracer::new(sink);

        let effects: Arc<dyn EffectRunner> = match self.effects {
            Some(effects) => effects,
            None => Arc::new(EffectExecutor::new(
                Arc::new(HandlerRegistry::new()),
                self.config.effects.clone(),
            )),
        };
        let provider: Arc<dyn HostContextProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(SystemContextProvider),
        };

        let mailboxes = Arc::new(MailboxManager::new());
        let runner = Arc::new(Runner::new(Arc::clone(&mailboxes), tracer.clone()));
        let schema = Arc::new(self.schema);
        let config = self.config;
        let core = self.core;
        let on_fatal = self.on_fatal;

        let shared = Arc::new_cyclic(|me: &Weak<HostShared>| {
            let submitter: Weak<dyn JobSubmitter> = me.clone();
            HostShared {
                deps: ContextDeps {
                    core,
                    schema,
                    effects,
                    provider,
                    tracer: tracer.clone(),
                    submitter,
                    on_fatal,
                    max_continue_iterations: config.runtime.max_continue_iterations,
                    retained_finished_slots: config.runtime.retained_finished_slots,
                },
                config,
                tracer,
                mailboxes,
                contexts: DashMap::new(),
                runner,
                me: me.clone(),
            }
        });

        info!(schema = %shared.deps.schema.hash, "Host initialized");
        Ok(Host { shared })
    }
}

/// State shared between the facade, the runner's drains and fulfillment
/// handles
struct HostShared {
    deps: ContextDeps,
    config: EngineConfig,
    tracer: Tracer,
    mailboxes: Arc<MailboxManager>,
    contexts: DashMap<ExecutionKey, Arc<ExecutionContext>>,
    runner: Arc<Runner>,
    me: Weak<HostShared>,
}

impl HostShared {
    fn context(&self, key: &ExecutionKey) -> Option<Arc<ExecutionContext>> {
        self.contexts.get(key).map(|ctx| Arc::clone(ctx.value()))
    }

    fn get_or_create_context(&self, key: &ExecutionKey) -> Arc<ExecutionContext> {
        if let Some(ctx) = self.context(key) {
            return ctx;
        }
        self.contexts
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = %key, "Creating execution context");
                let mailbox = self.mailboxes.get_or_create(key);
                Arc::new(ExecutionContext::new(key.clone(), mailbox, self.deps.clone()))
            })
            .value()
            .clone()
    }

    /// Enqueue through the context's admission gate and kick the runner;
    /// `None` if the context was torn down
    fn enqueue_and_kick(&self, ctx: &ExecutionContext, job: Job) -> Option<JobId> {
        ctx.admit(job, |key| {
            self.kick(key);
        })
    }

    fn kick(&self, key: &ExecutionKey) -> bool {
        match self.me.upgrade() {
            Some(me) => self.runner.kick(key, me),
            None => false,
        }
    }

    fn is_quiescent(&self, ctx: &ExecutionContext) -> bool {
        ctx.mailbox().is_empty() && !self.runner.is_draining(ctx.key()) && ctx.in_flight() == 0
    }
}

#[async_trait]
impl JobProcessor for HostShared {
    async fn process(&self, key: &ExecutionKey, envelope: Envelope) -> JobOutcome {
        let Some(ctx) = self.context(key) else {
            warn!(key = %key, job_id = %envelope.id, "Job for a key without context");
            return JobOutcome::Skipped;
        };

        let job_id = envelope.id;
        let kind = envelope.job.kind();
        let started = Instant::now();

        ctx.reset_frozen_context();
        self.tracer.emit(TraceEvent::JobStart {
            key: key.clone(),
            job_id,
            job: kind,
        });

        let outcome = if ctx.is_halted() {
            debug!(key = %key, job_id = %job_id, "Skipping job on halted key");
            JobOutcome::Skipped
        } else {
            handlers::dispatch(&ctx, envelope.job).await
        };

        self.tracer.emit(TraceEvent::JobEnd {
            key: key.clone(),
            job_id,
            job: kind,
            outcome,
        });
        metrics::counter!(
            metric_names::JOBS_PROCESSED,
            "job" => kind.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(metric_names::JOB_DURATION, "job" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    fn abort(&self, key: &ExecutionKey, job: AbortedJob, reason: String) {
        if let Some(ctx) = self.context(key) {
            ctx.escalate_to_fatal(
                job.intent_id.as_deref().unwrap_or_default(),
                format!("{} job panicked: {}", job.kind.as_str(), reason),
            );
        }
        self.tracer.emit(TraceEvent::JobEnd {
            key: key.clone(),
            job_id: job.id,
            job: job.kind,
            outcome: JobOutcome::Fatal,
        });
    }

    fn queue_drained(&self, key: &ExecutionKey) {
        debug!(key = %key, "Mailbox drained");
    }
}

impl JobSubmitter for HostShared {
    fn submit(&self, key: &ExecutionKey, job: Job) -> bool {
        match self.context(key) {
            Some(ctx) => self.enqueue_and_kick(&ctx, job).is_some(),
            None => false,
        }
    }
}

/// Per-key job execution engine
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Host {
    shared: Arc<HostShared>,
}

impl Host {
    pub fn builder(core: Arc<dyn Core>) -> HostBuilder {
        HostBuilder::new(core)
    }

    /// Start `intent` on `key` from the key's current head
    pub fn dispatch(&self, key: impl Into<ExecutionKey>, intent: Intent) -> Result<JobId> {
        self.submit(key, Job::StartIntent {
            intent,
            snapshot: None,
        })
    }

    /// Start `intent` on `key` after replacing the head with `snapshot`
    pub fn dispatch_with_snapshot(
        &self,
        key: impl Into<ExecutionKey>,
        intent: Intent,
        snapshot: Snapshot,
    ) -> Result<JobId> {
        self.submit(key, Job::StartIntent {
            intent,
            snapshot: Some(snapshot),
        })
    }

    /// Queue externally sourced patches for `key`
    pub fn apply_patches(
        &self,
        key: impl Into<ExecutionKey>,
        patches: Vec<Patch>,
        source: impl Into<String>,
    ) -> Result<JobId> {
        self.submit(key, Job::ApplyPatches {
            patches,
            source: source.into(),
        })
    }

    /// Enqueue any job for `key` and kick its runner
    ///
    /// Rejected with [`EngineError::KeyHalted`] once the key was escalated
    /// and with [`EngineError::KeyTornDown`] when it races a teardown.
    pub fn submit(&self, key: impl Into<ExecutionKey>, job: Job) -> Result<JobId> {
        let key = key.into();
        let ctx = self.shared.get_or_create_context(&key);
        if ctx.is_halted() {
            return Err(EngineError::KeyHalted(key));
        }
        self.shared
            .enqueue_and_kick(&ctx, job)
            .ok_or(EngineError::KeyTornDown(key))
    }

    pub fn snapshot(&self, key: &ExecutionKey) -> Option<Snapshot> {
        self.shared.context(key).map(|ctx| ctx.get_snapshot())
    }

    pub fn intent_status(&self, key: &ExecutionKey, intent_id: &str) -> Option<IntentSlot> {
        self.shared.context(key).and_then(|ctx| ctx.slot(intent_id))
    }

    /// Drop the slot of a finished intent, returning it
    pub fn forget_intent(&self, key: &ExecutionKey, intent_id: &str) -> Option<IntentSlot> {
        self.shared.context(key).and_then(|ctx| ctx.forget_slot(intent_id))
    }

    /// Escalation record of a halted key
    pub fn fatal(&self, key: &ExecutionKey) -> Option<FatalEscalation> {
        self.shared.context(key).and_then(|ctx| ctx.fatal())
    }

    pub fn context(&self, key: &ExecutionKey) -> Option<Arc<ExecutionContext>> {
        self.shared.context(key)
    }

    pub fn keys(&self) -> Vec<ExecutionKey> {
        self.shared.contexts.iter().map(|c| c.key().clone()).collect()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.shared.tracer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn runner_stats(&self) -> RunnerStats {
        self.shared.runner.stats()
    }

    /// Wait until `key` is quiescent, using the configured settle timeout
    pub async fn settle(&self, key: &ExecutionKey) -> Result<Snapshot> {
        self.settle_within(key, self.shared.config.runtime.settle_timeout())
            .await
    }

    /// Wait until `key` has an empty mailbox, no active drain and no
    /// outstanding effect, then return its head
    pub async fn settle_within(&self, key: &ExecutionKey, timeout: Duration) -> Result<Snapshot> {
        let ctx = self
            .shared
            .context(key)
            .ok_or_else(|| EngineError::UnknownKey(key.clone()))?;

        let wait = async {
            loop {
                let notified = self.shared.runner.idle().notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.shared.is_quiescent(&ctx) {
                    return;
                }

                // Effects finishing between drains do not signal the runner
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(SETTLE_POLL) => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EngineError::SettleTimeout {
                key: key.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })?;

        Ok(ctx.get_snapshot())
    }

    /// Remove `key`'s mailbox, drain turn and context
    ///
    /// Takes the key's drain turn and closes the context's admission gate
    /// before removing anything, so every submission either lands before
    /// teardown (which then refuses with [`EngineError::KeyBusy`]) or is
    /// rejected. Fulfillments arriving afterwards are discarded.
    pub fn teardown(&self, key: &ExecutionKey) -> Result<()> {
        let ctx = self
            .shared
            .context(key)
            .ok_or_else(|| EngineError::UnknownKey(key.clone()))?;
        let turn = self.shared.runner.turn(key);

        ctx.close_if(|| {
            if !turn.try_claim() {
                return Err(EngineError::KeyBusy(key.clone()));
            }
            if !ctx.mailbox().is_empty() {
                turn.release();
                return Err(EngineError::KeyBusy(key.clone()));
            }
            Ok(())
        })?;

        // Turn and mailbox go first: a context created for the same key
        // after this point must not inherit either of them
        self.shared.runner.remove(key);
        self.shared.mailboxes.remove(key);
        self.shared
            .contexts
            .remove_if(key, |_, current| Arc::ptr_eq(current, &ctx));

        info!(key = %key, in_flight = ctx.in_flight(), "Tore down execution key");
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("keys", &self.shared.contexts.len())
            .field("tracer", &self.shared.tracer)
            .finish()
    }
}
