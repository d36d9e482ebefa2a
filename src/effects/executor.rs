// src/effects/executor.rs
//! In-process effect executor
//!
//! Each dispatch spawns a task that:
//!
//! 1. resolves the handler (unknown type → `UNKNOWN_EFFECT`)
//! 2. waits for a concurrency permit (backpressure across all keys)
//! 3. runs the handler under the per-type timeout, retrying retryable
//!    failures up to `max_attempts`
//! 4. consumes the fulfillment handle with the final result
//!
//! Shutdown cancels in-flight work; cancelled effects are fulfilled with
//! `EFFECT_CANCELLED` so every requirement still gets its one result.

use crate::core::Patch;
use crate::effects::fulfillment::FulfillmentHandle;
use crate::effects::registry::HandlerRegistry;
use crate::effects::{EffectError, EffectRequest, EffectRunner};
use crate::observability::metric_names;
use crate::utils::config::EffectConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Effect runner backed by a [`HandlerRegistry`]
pub struct EffectExecutor {
    registry: Arc<HandlerRegistry>,
    config: Arc<EffectConfig>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    stats: Arc<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    retried: AtomicU64,
}

/// Executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub retried: u64,
}

impl EffectExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, config: EffectConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            registry,
            config: Arc::new(config),
            permits,
            shutdown: CancellationToken::new(),
            stats: Arc::new(StatsInner::default()),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Cancel every in-flight and future effect
    pub fn shutdown(&self) {
        debug!("Shutting down effect executor");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> EffectStats {
        EffectStats {
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
        }
    }

    async fn run(
        registry: Arc<HandlerRegistry>,
        config: Arc<EffectConfig>,
        permits: Arc<Semaphore>,
        stats: Arc<StatsInner>,
        request: &EffectRequest,
    ) -> Result<Vec<Patch>, EffectError> {
        let handler = registry
            .get(&request.effect_type)
            .ok_or_else(|| EffectError::unknown_effect(&request.effect_type))?;

        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|_| EffectError::cancelled())?;

        let timeout = config.timeout_for(&request.effect_type);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(timeout, handler.execute(request)).await {
                Ok(result) => result,
                Err(_) => {
                    stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_names::EFFECT_TIMEOUTS, "type" => request.effect_type.clone())
                        .increment(1);
                    Err(EffectError::timeout(&request.effect_type, timeout))
                }
            };

            match result {
                Err(error) if error.retryable && attempt < config.max_attempts => {
                    warn!(
                        requirement_id = %request.requirement_id,
                        effect_type = %request.effect_type,
                        attempt,
                        "Retrying effect after error: {}",
                        error
                    );
                    stats.retried.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    tokio::time::sleep(config.retry_backoff()).await;
                }
                other => return other,
            }
        }
    }
}

impl EffectRunner for EffectExecutor {
    fn dispatch(&self, request: EffectRequest, handle: FulfillmentHandle) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    requirement_id = %request.requirement_id,
                    "No tokio runtime available for effect dispatch"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                handle.fail(EffectError::new(
                    super::codes::RUNTIME_UNAVAILABLE,
                    "effect dispatched outside a tokio runtime",
                ));
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        let config = Arc::clone(&self.config);
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);
        let shutdown = self.shutdown.clone();

        runtime.spawn(async move {
            debug!(
                requirement_id = %request.requirement_id,
                effect_type = %request.effect_type,
                "Executing effect"
            );

            let result = tokio::select! {
                _ = shutdown.cancelled() => Err(EffectError::cancelled()),
                result = Self::run(registry, config, permits, Arc::clone(&stats), &request) => result,
            };

            match &result {
                Ok(_) => stats.succeeded.fetch_add(1, Ordering::Relaxed),
                Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
            };
            handle.complete(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Intent;
    use crate::effects::codes;
    use crate::effects::fulfillment::tests::{handle_for, CollectSubmitter};
    use crate::effects::handler::handler_fn;
    use crate::runtime::job::Job;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn request(effect_type: &str, requirement_id: &str) -> EffectRequest {
        EffectRequest {
            key: "k".into(),
            intent_id: "i-1".into(),
            requirement_id: requirement_id.into(),
            effect_type: effect_type.into(),
            params: json!({}),
            intent: Intent::new("fetch").with_id("i-1"),
        }
    }

    async fn wait_for_jobs(submitter: &CollectSubmitter, count: usize) -> Vec<Job> {
        for _ in 0..200 {
            {
                let jobs = submitter.jobs.lock();
                if jobs.len() >= count {
                    return jobs.iter().map(|(_, j)| j.clone()).collect();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} fulfillment jobs", count);
    }

    fn effect_error(job: &Job) -> Option<&EffectError> {
        match job {
            Job::FulfillEffect { effect_error, .. } => effect_error.as_ref(),
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_effect() {
        let registry = Arc::new(HandlerRegistry::new().with(
            "http",
            handler_fn(|_req: EffectRequest| async {
                Ok(vec![Patch::set("response", json!({ "data": "fetched" }))])
            }),
        ));
        let executor = EffectExecutor::new(registry, EffectConfig::default());
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, in_flight) = handle_for(&submitter, "req-1");

        executor.dispatch(request("http", "req-1"), handle);

        let jobs = wait_for_jobs(&submitter, 1).await;
        assert!(effect_error(&jobs[0]).is_none());
        assert_eq!(in_flight.load(Ordering::Acquire), 0);
        assert_eq!(executor.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_unknown_effect_type() {
        let executor = EffectExecutor::new(Arc::new(HandlerRegistry::new()), EffectConfig::default());
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, _) = handle_for(&submitter, "req-1");

        executor.dispatch(request("smtp", "req-1"), handle);

        let jobs = wait_for_jobs(&submitter, 1).await;
        assert_eq!(effect_error(&jobs[0]).unwrap().code, codes::UNKNOWN_EFFECT);
        assert_eq!(executor.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_and_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let registry = Arc::new(HandlerRegistry::new().with(
            "slow",
            handler_fn(move |_req: EffectRequest| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(vec![])
                }
            }),
        ));
        let config = EffectConfig {
            default_timeout_ms: 20,
            max_attempts: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let executor = EffectExecutor::new(registry, config);
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, _) = handle_for(&submitter, "req-1");

        executor.dispatch(request("slow", "req-1"), handle);

        let jobs = wait_for_jobs(&submitter, 1).await;
        assert_eq!(effect_error(&jobs[0]).unwrap().code, codes::EFFECT_TIMEOUT);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = executor.stats();
        assert_eq!(stats.timed_out, 2);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let registry = Arc::new(HandlerRegistry::new().with(
            "http",
            handler_fn(move |_req: EffectRequest| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EffectError::failed("boom"))
                }
            }),
        ));
        let config = EffectConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let executor = EffectExecutor::new(registry, config);
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, _) = handle_for(&submitter, "req-1");

        executor.dispatch(request("http", "req-1"), handle);

        let jobs = wait_for_jobs(&submitter, 1).await;
        assert_eq!(effect_error(&jobs[0]).unwrap().message, "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let registry = Arc::new(HandlerRegistry::new().with(
            "slow",
            handler_fn(|_req: EffectRequest| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(vec![])
            }),
        ));
        let executor = EffectExecutor::new(registry, EffectConfig::default());
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, _) = handle_for(&submitter, "req-1");

        executor.dispatch(request("slow", "req-1"), handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        executor.shutdown();

        let jobs = wait_for_jobs(&submitter, 1).await;
        assert_eq!(effect_error(&jobs[0]).unwrap().code, codes::EFFECT_CANCELLED);
        assert!(executor.is_shut_down());
    }

    #[test]
    fn test_dispatch_outside_runtime_fails_fast() {
        let executor = EffectExecutor::new(Arc::new(HandlerRegistry::new()), EffectConfig::default());
        let submitter = Arc::new(CollectSubmitter::default());
        let (handle, in_flight) = handle_for(&submitter, "req-1");

        executor.dispatch(request("http", "req-1"), handle);

        let jobs = submitter.jobs.lock();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            effect_error(&jobs[0].1).unwrap().code,
            codes::RUNTIME_UNAVAILABLE
        );
        assert_eq!(in_flight.load(Ordering::Acquire), 0);
    }
}
