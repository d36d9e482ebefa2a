//! Mailbox and drain throughput benchmarks
//!
//! Measures raw FIFO enqueue/dequeue cost, key lookup through the manager,
//! and end-to-end drain of `ApplyPatches` jobs through a host.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use host_engine::core::{apply_patches, ComputeResult, ComputeStatus, Core, CoreError};
use host_engine::runtime::{ExecutionMailbox, FixedContextProvider, HostContext, MailboxManager};
use host_engine::trace::NoopSink;
use host_engine::{ExecutionKey, Host, Intent, Job, Patch, Schema, Snapshot};
use serde_json::json;
use std::sync::Arc;

/// Applies patches, completes every intent immediately
struct PatchCore;

#[async_trait]
impl Core for PatchCore {
    async fn compute(
        &self,
        _schema: &Schema,
        snapshot: &Snapshot,
        _intent: &Intent,
        _ctx: &HostContext,
    ) -> Result<ComputeResult, CoreError> {
        Ok(ComputeResult {
            status: ComputeStatus::Complete,
            snapshot: snapshot.clone(),
            requirements: vec![],
        })
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
}

fn patch_job(i: usize) -> Job {
    Job::ApplyPatches {
        patches: vec![Patch::set("counter", json!(i))],
        source: "bench".to_string(),
    }
}

fn bench_mailbox_fifo(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_fifo");

    for size in [64usize, 1024] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("enqueue_dequeue", size), &size, |b, &size| {
            let mailbox = ExecutionMailbox::new(ExecutionKey::from("bench"));
            b.iter(|| {
                for i in 0..size {
                    mailbox.enqueue(patch_job(i));
                }
                while let Some(envelope) = mailbox.dequeue() {
                    black_box(envelope);
                }
            })
        });
    }

    group.finish();
}

fn bench_manager_lookup(c: &mut Criterion) {
    let manager = MailboxManager::new();
    let keys: Vec<ExecutionKey> = (0..1024)
        .map(|i| ExecutionKey::new(format!("key-{}", i)))
        .collect();
    for key in &keys {
        manager.get_or_create(key);
    }

    c.bench_function("manager_get_or_create_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(manager.get_or_create(&keys[i]))
        })
    });
}

fn bench_host_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("host_drain");

    for jobs in [16usize, 256] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::new("apply_patches", jobs), &jobs, |b, &jobs| {
            let host = Host::builder(Arc::new(PatchCore))
                .schema(Schema::new("bench"))
                .context_provider(Arc::new(FixedContextProvider::new(0, "bench")))
                .trace_sink(Arc::new(NoopSink))
                .build()
                .unwrap();
            let key = ExecutionKey::from("bench");

            b.to_async(&rt).iter(|| async {
                for i in 0..jobs {
                    host.submit(key.clone(), patch_job(i)).unwrap();
                }
                black_box(host.settle(&key).await.unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_mailbox_fifo,
    bench_manager_lookup,
    bench_host_drain
);
criterion_main!(benches);
