//! Retry behaviour of the mutation pipeline against a failing store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assetgraph_loader::{
    AlterOp, GraphStore, Mutation, MutationPipeline, NQuad, PipelineConfig, StoreError,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` mutations (all of them when `None`) with a
/// write conflict, or with a rejection when `reject` is set.
struct FlakyStore {
    failures: Option<usize>,
    reject: bool,
    calls: AtomicUsize,
    applied: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            reject: false,
            calls: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            failures: None,
            reject: true,
            calls: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn alter(&self, _op: AlterOp) -> Result<(), StoreError> {
        Ok(())
    }

    async fn mutate(&self, _mutation: &Mutation) -> Result<(), StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.map_or(true, |n| call < n) {
            return Err(if self.reject {
                StoreError::Rejected("unknown predicate".into())
            } else {
                StoreError::Aborted("write conflict".into())
            });
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn batch() -> Mutation {
    Mutation::from_quads(vec![NQuad::string("0x1", "type_name", "product")])
}

fn config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff_ms: 1,
        max_retry_backoff_ms: 5,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_aborted_batch_is_retried_until_applied() {
    let store = FlakyStore::new(Some(3));
    let (tx, handle) = MutationPipeline::start(store.clone(), config(), CancellationToken::new())
        .await
        .unwrap();
    tx.send(batch()).await.unwrap();
    drop(tx);

    let report = handle.finish().await.unwrap();
    assert_eq!(report.aborted, 0);
    assert_eq!(report.mutations, 1);
    assert_eq!(store.calls(), 4);
    assert_eq!(store.applied.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_path_saturated_retries_in_worker() {
    let store = FlakyStore::new(Some(6));
    let cfg = PipelineConfig {
        retry_capacity: 1,
        max_concurrent_retries: 1,
        workers: 2,
        ..config()
    };
    let (tx, handle) = MutationPipeline::start(store.clone(), cfg, CancellationToken::new())
        .await
        .unwrap();
    for _ in 0..4 {
        tx.send(batch()).await.unwrap();
    }
    drop(tx);

    let report = handle.finish().await.unwrap();
    assert_eq!(report.aborted, 0);
    assert_eq!(report.mutations, 4);
}

#[tokio::test]
async fn test_batch_failing_until_done_is_counted_once() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter = dir.path().join("lost.jsonl");
    let store = FlakyStore::new(None);
    let cfg = PipelineConfig {
        drain_timeout_ms: Some(100),
        dead_letter_file: Some(dead_letter.clone()),
        ..config()
    };
    let (tx, handle) = MutationPipeline::start(store.clone(), cfg, CancellationToken::new())
        .await
        .unwrap();
    tx.send(batch()).await.unwrap();
    drop(tx);

    let report = handle.finish().await.unwrap();
    assert_eq!(report.aborted, 1);
    assert_eq!(report.mutations, 0);
    assert!(store.calls() > 1);

    // Nothing retries once the pipeline has finished.
    let calls = store.calls();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.calls(), calls);

    let body = std::fs::read_to_string(&dead_letter).unwrap();
    assert_eq!(body.lines().count(), 1);
    let lost: Mutation = serde_json::from_str(body.trim()).unwrap();
    assert_eq!(lost.set, batch().set);
    assert!(lost.attempts >= 1);
}

#[tokio::test]
async fn test_external_done_stops_retries() {
    let store = FlakyStore::new(None);
    let done = CancellationToken::new();
    let (tx, handle) = MutationPipeline::start(store.clone(), config(), done.clone())
        .await
        .unwrap();
    tx.send(batch()).await.unwrap();
    tx.send(batch()).await.unwrap();
    drop(tx);

    tokio::time::sleep(Duration::from_millis(20)).await;
    done.cancel();
    let report = handle.finish().await.unwrap();
    assert_eq!(report.aborted, 2);
    assert_eq!(report.mutations, 0);
}

#[tokio::test]
async fn test_default_drain_bounds_finish() {
    let store = FlakyStore::new(None);
    let cfg = PipelineConfig::default();
    assert!(cfg.drain_timeout().is_some());
    let (tx, handle) = MutationPipeline::start(store.clone(), cfg, CancellationToken::new())
        .await
        .unwrap();
    tx.send(batch()).await.unwrap();
    drop(tx);

    let report = tokio::time::timeout(Duration::from_secs(20), handle.finish())
        .await
        .expect("finish must return once the drain timeout elapses")
        .unwrap();
    assert_eq!(report.aborted, 1);
    assert_eq!(report.mutations, 0);
    assert!(store.calls() > 1);
}

#[tokio::test]
async fn test_rejected_batch_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter = dir.path().join("lost.jsonl");
    let store = FlakyStore::rejecting();
    let cfg = PipelineConfig {
        dead_letter_file: Some(dead_letter.clone()),
        ..config()
    };
    let (tx, handle) = MutationPipeline::start(store.clone(), cfg, CancellationToken::new())
        .await
        .unwrap();
    tx.send(batch()).await.unwrap();
    drop(tx);

    // Nothing is left to retry, so the pipeline goes idle at once.
    let report = tokio::time::timeout(Duration::from_secs(1), handle.finish())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.aborted, 1);
    assert_eq!(store.calls(), 1);

    let body = std::fs::read_to_string(&dead_letter).unwrap();
    let lost: Mutation = serde_json::from_str(body.trim()).unwrap();
    assert_eq!(lost.attempts, 1);
}
