// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Time-windowed request batching.
//!
//! ```text
//!  submit ──► queue (FIFO) ──notify──► worker task
//!                                         │ wait for work (1 s poll)
//!                                         │ sleep window_ms
//!                                         │ drain ≤ max_batch
//!                                         ▼
//!                            spawn_blocking(run_batch)
//!                                         │ fused call if possible,
//!                                         │ sequential otherwise
//!                                         ▼
//!                              oneshot reply per request
//! ```
//!
//! Every pending request is resolved exactly once: with its output, with
//! its own backend error, or by the caller giving up on a timeout.

use crate::backend::{GenerationParams, InferenceBackend};
use crate::stats::{BatcherStats, Counters};
use crate::{AdmissionError, BatcherConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

/// How often an idle worker re-checks the running flag.
const IDLE_POLL: Duration = Duration::from_secs(1);

type Reply = oneshot::Sender<Result<String, AdmissionError>>;

struct PendingRequest {
    id: u64,
    prompt: String,
    params: GenerationParams,
    reply: Reply,
    submitted_at: Instant,
}

#[derive(Default)]
struct Queue {
    items: VecDeque<PendingRequest>,
    running: bool,
}

struct Shared {
    backend: Arc<dyn InferenceBackend>,
    config: BatcherConfig,
    queue: Mutex<Queue>,
    has_work: Notify,
    counters: Mutex<Counters>,
    next_id: AtomicU64,
}

/// Collects concurrent generation requests into batches.
pub struct InferenceBatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InferenceBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBatcher")
            .field("backend", &self.shared.backend.name())
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl InferenceBatcher {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: BatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                queue: Mutex::new(Queue::default()),
                has_work: Notify::new(),
                counters: Mutex::new(Counters::default()),
                next_id: AtomicU64::new(1),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running
    }

    /// Spawns the worker task. Must be called inside a tokio runtime.
    ///
    /// Returns `false` if the batcher was already running.
    pub fn start(&self) -> bool {
        {
            let mut queue = self.shared.queue.lock();
            if queue.running {
                return false;
            }
            queue.running = true;
        }
        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(tokio::spawn(worker_loop(shared)));
        tracing::info!(
            "batcher started (backend={}, window={}ms, max_batch={})",
            self.shared.backend.name(),
            self.shared.config.window_ms,
            self.shared.config.max_batch
        );
        true
    }

    /// Stops the worker and resolves everything still queued.
    pub async fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.running {
                return;
            }
            queue.running = false;
        }
        self.shared.has_work.notify_one();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::error!("batcher worker ended abnormally: {e}");
            }
        }

        loop {
            let batch = drain(&self.shared);
            if batch.is_empty() {
                break;
            }
            process_batch(&self.shared, batch).await;
        }
        tracing::info!("batcher stopped; {}", self.stats().summary());
    }

    /// Submits a request with the configured timeout.
    pub async fn submit(
        &self,
        prompt: impl Into<String>,
        params: GenerationParams,
    ) -> Result<String, AdmissionError> {
        let timeout = self.shared.config.timeout();
        self.submit_with_timeout(prompt, params, timeout).await
    }

    /// Submits a request and waits at most `timeout` for its result.
    ///
    /// When the batcher is not running the backend is called directly. On
    /// timeout only the caller is released; queued work still runs.
    pub async fn submit_with_timeout(
        &self,
        prompt: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> Result<String, AdmissionError> {
        let prompt = prompt.into();
        let request_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let receiver = {
            let mut queue = self.shared.queue.lock();
            if queue.running {
                let (reply, receiver) = oneshot::channel();
                queue.items.push_back(PendingRequest {
                    id: request_id,
                    prompt: prompt.clone(),
                    params: params.clone(),
                    reply,
                    submitted_at: Instant::now(),
                });
                Some(receiver)
            } else {
                None
            }
        };

        let Some(receiver) = receiver else {
            return self.call_direct(request_id, prompt, params, timeout).await;
        };
        self.shared.has_work.notify_one();

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdmissionError::ShuttingDown),
            Err(_) => {
                tracing::warn!("request {request_id} timed out after {timeout:?}");
                Err(AdmissionError::Timeout {
                    request_id,
                    timeout,
                })
            }
        }
    }

    async fn call_direct(
        &self,
        request_id: u64,
        prompt: String,
        params: GenerationParams,
        timeout: Duration,
    ) -> Result<String, AdmissionError> {
        let backend = Arc::clone(&self.shared.backend);
        let call = tokio::task::spawn_blocking(move || backend.generate(&prompt, &params));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result.map_err(|e| AdmissionError::Backend(e.0)),
            Ok(Err(e)) => Err(AdmissionError::Backend(format!("backend call panicked: {e}"))),
            Err(_) => Err(AdmissionError::Timeout {
                request_id,
                timeout,
            }),
        }
    }

    pub fn stats(&self) -> BatcherStats {
        let pending = self.shared.queue.lock().items.len();
        self.shared.counters.lock().snapshot(pending)
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let idle = {
            let queue = shared.queue.lock();
            if !queue.running {
                break;
            }
            queue.items.is_empty()
        };
        if idle {
            let _ = tokio::time::timeout(IDLE_POLL, shared.has_work.notified()).await;
            let queue = shared.queue.lock();
            if !queue.running {
                break;
            }
            if queue.items.is_empty() {
                continue;
            }
        }

        tokio::time::sleep(shared.config.window()).await;
        let batch = drain(&shared);
        if !batch.is_empty() {
            process_batch(&shared, batch).await;
        }
    }
    tracing::debug!("batcher worker exiting");
}

/// Takes up to `max_batch` requests from the front of the queue.
fn drain(shared: &Shared) -> Vec<PendingRequest> {
    let mut queue = shared.queue.lock();
    let n = queue.items.len().min(shared.config.max_batch.max(1));
    queue.items.drain(..n).collect()
}

async fn process_batch(shared: &Shared, batch: Vec<PendingRequest>) {
    let started = Instant::now();
    let size = batch.len();
    if let Some(oldest) = batch.first() {
        tracing::debug!(
            "processing batch of {size} (first request {} queued {:?})",
            oldest.id,
            oldest.submitted_at.elapsed()
        );
    }

    let (replies, work): (Vec<Reply>, Vec<(String, GenerationParams)>) = batch
        .into_iter()
        .map(|r| (r.reply, (r.prompt, r.params)))
        .unzip();

    let backend = Arc::clone(&shared.backend);
    let results = match tokio::task::spawn_blocking(move || run_batch(backend.as_ref(), &work)).await
    {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("batch of {size} panicked: {e}");
            vec![Err(AdmissionError::Backend(format!("batch worker panicked: {e}"))); size]
        }
    };

    for (reply, result) in replies.into_iter().zip(results) {
        // The caller may already have timed out.
        let _ = reply.send(result);
    }
    shared.counters.lock().record_batch(size, started.elapsed());
}

/// Runs one batch on a blocking thread, returning one result per request.
fn run_batch(
    backend: &dyn InferenceBackend,
    work: &[(String, GenerationParams)],
) -> Vec<Result<String, AdmissionError>> {
    if work.len() > 1 && backend.supports_batch() {
        if let Some((_, params)) = work.first() {
            if work.iter().all(|(_, p)| p == params) {
                let prompts: Vec<String> = work.iter().map(|(p, _)| p.clone()).collect();
                match backend.generate_batch(&prompts, params) {
                    Ok(outputs) if outputs.len() == work.len() => {
                        return outputs.into_iter().map(Ok).collect();
                    }
                    Ok(outputs) => tracing::warn!(
                        "batched call returned {} results for {} prompts; running sequentially",
                        outputs.len(),
                        work.len()
                    ),
                    Err(e) => tracing::warn!("batched call failed ({e}); running sequentially"),
                }
            }
        }
    }

    work.iter()
        .map(|(prompt, params)| {
            backend.generate(prompt, params).map_err(|e| {
                tracing::error!("request failed in {}: {e}", backend.name());
                AdmissionError::Backend(e.0)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, EchoBackend};
    use std::sync::atomic::AtomicUsize;

    fn config(window_ms: u64, max_batch: usize) -> BatcherConfig {
        BatcherConfig {
            window_ms,
            max_batch,
            timeout_s: 5.0,
        }
    }

    /// Counts fused calls and returns one output too few.
    struct ShortBatchBackend {
        fused_calls: AtomicUsize,
    }

    impl InferenceBackend for ShortBatchBackend {
        fn name(&self) -> &str {
            "short"
        }

        fn generate(&self, prompt: &str, _: &GenerationParams) -> Result<String, BackendError> {
            Ok(prompt.to_uppercase())
        }

        fn supports_batch(&self) -> bool {
            true
        }

        fn generate_batch(
            &self,
            prompts: &[String],
            _: &GenerationParams,
        ) -> Result<Vec<String>, BackendError> {
            self.fused_calls.fetch_add(1, Ordering::SeqCst);
            Ok(prompts.iter().skip(1).cloned().collect())
        }
    }

    struct SlowBackend;

    impl InferenceBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        fn generate(&self, prompt: &str, _: &GenerationParams) -> Result<String, BackendError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn test_three_requests_two_batches() {
        let batcher = InferenceBatcher::new(Arc::new(EchoBackend::new()), config(50, 2));
        assert!(batcher.start());
        assert!(!batcher.start());

        let p = GenerationParams::default();
        let (a, b, c) = tokio::join!(
            batcher.submit("alpha", p.clone()),
            batcher.submit("beta", p.clone()),
            batcher.submit("gamma", p.clone()),
        );
        batcher.stop().await;

        assert_eq!(a.unwrap(), "alpha");
        assert_eq!(b.unwrap(), "beta");
        assert_eq!(c.unwrap(), "gamma");

        let stats = batcher.stats();
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_failure_isolated_within_batch() {
        let backend = EchoBackend::new().batched().failing_on("boom");
        let batcher = InferenceBatcher::new(Arc::new(backend), config(30, 3));
        batcher.start();

        let p = GenerationParams::default();
        let (a, b, c) = tokio::join!(
            batcher.submit("first", p.clone()),
            batcher.submit("boom", p.clone()),
            batcher.submit("third", p.clone()),
        );
        batcher.stop().await;

        assert_eq!(a.unwrap(), "first");
        assert!(matches!(b, Err(AdmissionError::Backend(_))));
        assert_eq!(c.unwrap(), "third");
        assert_eq!(batcher.stats().total_batches, 1);
    }

    #[tokio::test]
    async fn test_result_count_mismatch_falls_back() {
        let backend = Arc::new(ShortBatchBackend {
            fused_calls: AtomicUsize::new(0),
        });
        let batcher = InferenceBatcher::new(backend.clone(), config(30, 4));
        batcher.start();

        let p = GenerationParams::default();
        let (a, b) = tokio::join!(batcher.submit("x", p.clone()), batcher.submit("y", p.clone()));
        batcher.stop().await;

        assert_eq!(a.unwrap(), "X");
        assert_eq!(b.unwrap(), "Y");
        assert_eq!(backend.fused_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mixed_params_skip_fused_call() {
        let backend = Arc::new(ShortBatchBackend {
            fused_calls: AtomicUsize::new(0),
        });
        let batcher = InferenceBatcher::new(backend.clone(), config(30, 4));
        batcher.start();

        let cold = GenerationParams {
            temperature: 0.1,
            ..GenerationParams::default()
        };
        let (a, b) = tokio::join!(
            batcher.submit("x", GenerationParams::default()),
            batcher.submit("y", cold),
        );
        batcher.stop().await;

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.fused_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_direct_call_when_not_running() {
        let batcher = InferenceBatcher::new(Arc::new(EchoBackend::new()), config(50, 2));
        let out = batcher
            .submit("no worker", GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out, "no worker");
        assert_eq!(batcher.stats().total_batches, 0);
    }

    #[tokio::test]
    async fn test_timeout_releases_caller() {
        let batcher = InferenceBatcher::new(Arc::new(SlowBackend), config(10, 1));
        batcher.start();

        let result = batcher
            .submit_with_timeout("late", GenerationParams::default(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(AdmissionError::Timeout { .. })));

        batcher.stop().await;
        assert_eq!(batcher.stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let batcher = Arc::new(InferenceBatcher::new(
            Arc::new(EchoBackend::new()),
            config(200, 2),
        ));
        batcher.start();

        let mut handles = Vec::new();
        for i in 0..3 {
            let b = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                b.submit(format!("req {i}"), GenerationParams::default()).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        batcher.stop().await;

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        let stats = batcher.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.pending_requests, 0);
        assert!(!batcher.is_running());
    }
}
