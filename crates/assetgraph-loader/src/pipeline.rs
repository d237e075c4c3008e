//! Mutation pipeline
//!
//! ```text
//!  producers ──BatchSender──► main channel ──► workers ──mutate──► GraphStore
//!                                  ▲                │ failure
//!                                  │                ▼
//!                           retry tasks ◄── retry handler ◄── aborted queue
//!                      (backoff, semaphore)
//! ```
//!
//! A batch failing with a retryable [`StoreError`] is retried until the done
//! token fires. Once done fires, a batch that has not been applied is counted
//! in the [`AbortCounter`] exactly once, optionally written to the dead-letter
//! file, and dropped. A batch the store rejects outright takes the same exit
//! immediately.
//!
//! Done fires on interrupt (the caller cancels the token), or from
//! [`PipelineHandle::finish`] once the pipeline is idle or the drain timeout
//! has elapsed.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{LoaderError, Result};
use crate::quad::Mutation;
use crate::store::{GraphStore, StoreError};

/// Batches that were never applied.
#[derive(Debug, Default)]
pub struct AbortCounter {
    count: AtomicU64,
}

impl AbortCounter {
    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Batches applied by the store
    pub mutations: u64,
    /// Triples in the applied batches
    pub quads: u64,
    /// Batches rejected by the store or still unapplied when done fired
    pub aborted: u64,
}

struct DeadLetter {
    path: std::path::PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl DeadLetter {
    async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| LoaderError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(file),
        })
    }

    async fn record(&self, mutation: &Mutation) {
        let mut line = match serde_json::to_vec(mutation) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "cannot encode lost batch");
                return;
            }
        };
        line.push(b'\n');
        let mut file = self.file.lock().await;
        // tokio files complete writes in the background until flushed.
        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!(path = %self.path.display(), error = %e, "cannot write dead letter");
        }
    }
}

/// State shared by producers, workers and retry tasks.
struct Shared {
    done: CancellationToken,
    /// Batches accepted and neither applied nor lost.
    pending: watch::Sender<usize>,
    aborted: AbortCounter,
    mutations: AtomicU64,
    quads: AtomicU64,
    dead_letter: Option<DeadLetter>,
    config: PipelineConfig,
    started: Instant,
}

impl Shared {
    fn add_pending(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    fn settle(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn applied(&self, mutation: &Mutation) {
        let mutations = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        let quads = self.quads.fetch_add(mutation.len() as u64, Ordering::SeqCst) + mutation.len() as u64;
        tracing::debug!(
            elapsed = ?self.started.elapsed(),
            mutations,
            quads,
            batch = mutation.len(),
            "batch applied"
        );
        self.settle();
    }

    async fn lost(&self, mutation: Mutation) {
        self.aborted.inc();
        tracing::warn!(batch = mutation.len(), attempts = mutation.attempts, "batch lost");
        if let Some(dl) = &self.dead_letter {
            dl.record(&mutation).await;
        }
        self.settle();
    }
}

/// Producer side of the pipeline.
#[derive(Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Mutation>,
    shared: Arc<Shared>,
}

impl BatchSender {
    /// Queue `mutation`, waiting for room on the channel. Fails once done has
    /// fired.
    pub async fn send(&self, mutation: Mutation) -> Result<()> {
        if mutation.is_empty() {
            return Ok(());
        }
        let done = &self.shared.done;
        if done.is_cancelled() {
            return Err(LoaderError::Stopped("loader stopped, not all records processed".into()));
        }

        self.shared.add_pending();
        let permit = tokio::select! {
            biased;
            _ = done.cancelled() => None,
            permit = self.tx.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => {
                permit.send(mutation);
                Ok(())
            }
            None => {
                self.shared.settle();
                Err(LoaderError::Stopped("loader stopped, not all records processed".into()))
            }
        }
    }

    pub fn done(&self) -> &CancellationToken {
        &self.shared.done
    }
}

/// Owner side: joins the pipeline tasks.
pub struct PipelineHandle {
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Mutation>>>,
    workers: JoinSet<()>,
    retry_handler: JoinHandle<()>,
}

pub struct MutationPipeline;

impl MutationPipeline {
    /// Spawn the workers and the retry handler. `done` may be cancelled by the
    /// caller at any time to stop the run.
    pub async fn start(
        store: Arc<dyn GraphStore>,
        config: PipelineConfig,
        done: CancellationToken,
    ) -> Result<(BatchSender, PipelineHandle)> {
        let dead_letter = match &config.dead_letter_file {
            Some(path) => Some(DeadLetter::open(path).await?),
            None => None,
        };
        let (pending, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            done,
            pending,
            aborted: AbortCounter::default(),
            mutations: AtomicU64::new(0),
            quads: AtomicU64::new(0),
            dead_letter,
            config: config.clone(),
            started: Instant::now(),
        });

        let (main_tx, main_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (aborted_tx, aborted_rx) = mpsc::channel(config.retry_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(main_rx));

        let mut workers = JoinSet::new();
        for id in 0..config.workers.max(1) {
            workers.spawn(worker(
                id,
                Arc::clone(&store),
                Arc::clone(&rx),
                aborted_tx.clone(),
                Arc::clone(&shared),
            ));
        }
        drop(aborted_tx);

        let retry_handler = tokio::spawn(handle_aborted(aborted_rx, main_tx.clone(), Arc::clone(&shared)));

        tracing::info!(workers = config.workers.max(1), capacity = config.channel_capacity, "pipeline started");
        Ok((
            BatchSender {
                tx: main_tx,
                shared: Arc::clone(&shared),
            },
            PipelineHandle {
                shared,
                rx,
                workers,
                retry_handler,
            },
        ))
    }
}

impl PipelineHandle {
    pub fn done(&self) -> &CancellationToken {
        &self.shared.done
    }

    /// Batches accepted but not yet applied or lost.
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    pub fn aborted(&self) -> u64 {
        self.shared.aborted.count()
    }

    /// Resolves once no batch is queued, in flight or waiting for a retry.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.pending.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Call after every producer has finished. Waits for the pipeline to go
    /// idle (bounded by the drain timeout), fires done and joins every task.
    pub async fn finish(mut self) -> Result<PipelineReport> {
        let done = self.shared.done.clone();
        let drain = async {
            match self.shared.config.drain_timeout() {
                Some(timeout) => {
                    if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
                        tracing::warn!(?timeout, pending = self.pending(), "drain timeout elapsed");
                    }
                }
                None => self.wait_idle().await,
            }
        };
        tokio::select! {
            _ = done.cancelled() => tracing::info!("pipeline stopped before drain"),
            _ = drain => {}
        }
        done.cancel();

        let mut first_err = None;
        if let Err(e) = (&mut self.retry_handler).await {
            first_err.get_or_insert(LoaderError::Join(e));
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                first_err.get_or_insert(LoaderError::Join(e));
            }
        }

        // Anything still queued was accepted but never applied.
        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(mutation) = rx.try_recv() {
            self.shared.lost(mutation).await;
        }
        drop(rx);

        if let Some(e) = first_err {
            return Err(e);
        }
        let report = PipelineReport {
            mutations: self.shared.mutations.load(Ordering::SeqCst),
            quads: self.shared.quads.load(Ordering::SeqCst),
            aborted: self.shared.aborted.count(),
        };
        tracing::info!(
            mutations = report.mutations,
            quads = report.quads,
            aborted = report.aborted,
            elapsed = ?self.shared.started.elapsed(),
            "pipeline finished"
        );
        Ok(report)
    }
}

async fn worker(
    id: usize,
    store: Arc<dyn GraphStore>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Mutation>>>,
    aborted_tx: mpsc::Sender<Mutation>,
    shared: Arc<Shared>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.done.cancelled() => None,
            m = async { rx.lock().await.recv().await } => m,
        };
        let Some(mut mutation) = next else {
            break;
        };

        let err = match store.mutate(&mutation).await {
            Ok(()) => {
                shared.applied(&mutation);
                continue;
            }
            Err(e) => e,
        };
        mutation.attempts += 1;
        if !err.is_retryable() {
            rejected(id, mutation, &err, &shared).await;
            continue;
        }
        tracing::warn!(worker = id, attempts = mutation.attempts, error = %err, "mutation failed");

        if shared.done.is_cancelled() {
            shared.lost(mutation).await;
            continue;
        }
        match aborted_tx.try_send(mutation) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(mutation)) => shared.lost(mutation).await,
            // The retry path is saturated; keep this batch in the worker.
            Err(mpsc::error::TrySendError::Full(mutation)) => {
                retry_in_place(id, store.as_ref(), mutation, &shared).await
            }
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}

async fn retry_in_place(id: usize, store: &dyn GraphStore, mut mutation: Mutation, shared: &Shared) {
    loop {
        let delay = shared.config.backoff(mutation.attempts);
        tokio::select! {
            biased;
            _ = shared.done.cancelled() => return shared.lost(mutation).await,
            _ = tokio::time::sleep(delay) => {}
        }
        match store.mutate(&mutation).await {
            Ok(()) => return shared.applied(&mutation),
            Err(e) if e.is_retryable() => {
                mutation.attempts += 1;
                tracing::warn!(worker = id, attempts = mutation.attempts, error = %e, "mutation failed again");
            }
            Err(e) => {
                mutation.attempts += 1;
                return rejected(id, mutation, &e, shared).await;
            }
        }
    }
}

async fn rejected(id: usize, mutation: Mutation, err: &StoreError, shared: &Shared) {
    tracing::error!(worker = id, attempts = mutation.attempts, error = %err, "mutation rejected, not retried");
    shared.lost(mutation).await;
}

async fn handle_aborted(mut aborted_rx: mpsc::Receiver<Mutation>, main_tx: mpsc::Sender<Mutation>, shared: Arc<Shared>) {
    let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent_retries.max(1)));
    let mut retries = JoinSet::new();

    loop {
        let mutation = tokio::select! {
            biased;
            _ = shared.done.cancelled() => break,
            m = aborted_rx.recv() => match m {
                Some(m) => m,
                None => break,
            },
        };
        let permit = tokio::select! {
            biased;
            _ = shared.done.cancelled() => {
                shared.lost(mutation).await;
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    shared.lost(mutation).await;
                    break;
                }
            },
        };
        retries.spawn(retry(mutation, main_tx.clone(), Arc::clone(&shared), permit));
        // Reap finished retries so the set does not grow with the run.
        while retries.try_join_next().is_some() {}
    }

    aborted_rx.close();
    while let Ok(mutation) = aborted_rx.try_recv() {
        shared.lost(mutation).await;
    }
    while let Some(joined) = retries.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "retry task failed");
        }
    }
    tracing::debug!("retry handler stopped");
}

/// Put `mutation` back on the main channel after its backoff, unless done
/// fires first.
async fn retry(
    mutation: Mutation,
    main_tx: mpsc::Sender<Mutation>,
    shared: Arc<Shared>,
    _permit: tokio::sync::OwnedSemaphorePermit,
) {
    let delay = shared.config.backoff(mutation.attempts);
    let slot = tokio::select! {
        biased;
        _ = shared.done.cancelled() => None,
        slot = async {
            tokio::time::sleep(delay).await;
            main_tx.reserve().await
        } => slot.ok(),
    };
    match slot {
        Some(slot) => slot.send(mutation),
        None => shared.lost(mutation).await,
    }
}
