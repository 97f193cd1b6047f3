// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Round-trip cost of each off-device tier.
//!
//! ```text
//!   host RAM   ── copy the payload in memory
//!   local disk ── write + read a scratch file (always removed)
//!   remote     ── probe the first remote node under a short timeout
//! ```
//!
//! A tier that cannot be measured reports `+Inf` and is never the fastest.

use block_transport::{BlockTransport, RemoteNode};
use memory_manager::{Block, Tier};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency in seconds per off-device tier.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BenchmarkResult {
    pub latencies: BTreeMap<Tier, f64>,
}

impl BenchmarkResult {
    pub fn get(&self, tier: Tier) -> Option<f64> {
        self.latencies.get(&tier).copied()
    }

    /// The finite arg-min, earliest tier on ties.
    pub fn fastest(&self) -> Option<Tier> {
        let mut best: Option<(Tier, f64)> = None;
        for (&tier, &secs) in &self.latencies {
            if !secs.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, b)| secs < b) {
                best = Some((tier, secs));
            }
        }
        best.map(|(tier, _)| tier)
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .latencies
            .iter()
            .map(|(tier, secs)| {
                if secs.is_finite() {
                    format!("{tier} {:.3}ms", secs * 1000.0)
                } else {
                    format!("{tier} unreachable")
                }
            })
            .collect();
        format!("Tiers: {}", parts.join(", "))
    }
}

/// Measures tier latencies for a block.
pub struct TierBenchmarker {
    scratch_dir: PathBuf,
    remote_nodes: Vec<RemoteNode>,
    transport: Arc<dyn BlockTransport>,
    probe_timeout: Duration,
    seq: AtomicU64,
    last: Mutex<Option<BenchmarkResult>>,
}

impl std::fmt::Debug for TierBenchmarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierBenchmarker")
            .field("scratch_dir", &self.scratch_dir)
            .field("remote_nodes", &self.remote_nodes)
            .field("transport", &self.transport.name())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl TierBenchmarker {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        remote_nodes: Vec<RemoteNode>,
        transport: Arc<dyn BlockTransport>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            remote_nodes,
            transport,
            probe_timeout,
            seq: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Host-memory copy round trip, seconds.
    pub fn bench_host_ram(&self, block: &Block) -> f64 {
        let start = Instant::now();
        let copy = block.payload().to_vec();
        std::hint::black_box(&copy);
        start.elapsed().as_secs_f64()
    }

    /// Write-then-read through a scratch file, seconds; `+Inf` on failure.
    pub async fn bench_local_disk(&self, block: &Block) -> f64 {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self
            .scratch_dir
            .join(format!("bench-{}-{}-{n}.tmp", std::process::id(), block.id().0));

        let start = Instant::now();
        let outcome = write_read(&path, block.payload()).await;
        let elapsed = start.elapsed().as_secs_f64();

        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("cannot remove {}: {e}", path.display());
            }
        }
        match outcome {
            Ok(()) => elapsed,
            Err(e) => {
                tracing::warn!("local disk benchmark failed: {e}");
                f64::INFINITY
            }
        }
    }

    /// Probe to the first remote node, seconds; `+Inf` if there is none or
    /// the probe fails or times out.
    pub async fn bench_remote(&self, block: &Block) -> f64 {
        let Some(node) = self.remote_nodes.first() else {
            return f64::INFINITY;
        };
        let start = Instant::now();
        match tokio::time::timeout(self.probe_timeout, self.transport.probe(node, block.payload()))
            .await
        {
            Ok(Ok(_)) => start.elapsed().as_secs_f64(),
            Ok(Err(e)) => {
                tracing::warn!("remote benchmark to {node} failed: {e}");
                f64::INFINITY
            }
            Err(_) => {
                tracing::warn!("remote benchmark to {node} timed out after {:?}", self.probe_timeout);
                f64::INFINITY
            }
        }
    }

    /// Measures every off-device tier and remembers the result.
    pub async fn bench_all(&self, block: &Block) -> BenchmarkResult {
        let mut latencies = BTreeMap::new();
        latencies.insert(Tier::HostRam, self.bench_host_ram(block));
        latencies.insert(Tier::LocalDisk, self.bench_local_disk(block).await);
        latencies.insert(Tier::Remote, self.bench_remote(block).await);

        let result = BenchmarkResult { latencies };
        tracing::debug!("benchmarked {}: {}", block.id(), result.summary());
        *self.last.lock() = Some(result.clone());
        result
    }

    pub fn last_result(&self) -> Option<BenchmarkResult> {
        self.last.lock().clone()
    }

    /// Fastest tier of the last run; [`Tier::GpuPrimary`] ("stay on
    /// device") if nothing ran or every tier was unreachable.
    pub fn fastest_tier(&self) -> Tier {
        self.last
            .lock()
            .as_ref()
            .and_then(BenchmarkResult::fastest)
            .unwrap_or(Tier::GpuPrimary)
    }
}

async fn write_read(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, payload).await?;
    let back = tokio::fs::read(path).await?;
    if back.len() != payload.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read back {} of {} bytes", back.len(), payload.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_transport::InMemoryTransport;

    fn bencher(dir: &Path, nodes: Vec<RemoteNode>, transport: Arc<InMemoryTransport>) -> TierBenchmarker {
        TierBenchmarker::new(dir, nodes, transport, Duration::from_millis(200))
    }

    #[test]
    fn test_fastest_skips_infinite() {
        let mut r = BenchmarkResult::default();
        r.latencies.insert(Tier::HostRam, f64::INFINITY);
        r.latencies.insert(Tier::LocalDisk, 0.5);
        r.latencies.insert(Tier::Remote, 0.2);
        assert_eq!(r.fastest(), Some(Tier::Remote));

        r.latencies.insert(Tier::Remote, f64::INFINITY);
        r.latencies.insert(Tier::LocalDisk, f64::INFINITY);
        assert_eq!(r.fastest(), None);
        assert!(r.summary().contains("unreachable"));
    }

    #[test]
    fn test_stay_before_any_run() {
        let dir = tempfile::tempdir().unwrap();
        let b = bencher(dir.path(), Vec::new(), Arc::new(InMemoryTransport::new()));
        assert_eq!(b.fastest_tier(), Tier::GpuPrimary);
        assert!(b.last_result().is_none());
    }

    #[tokio::test]
    async fn test_disk_scratch_removed() {
        let dir = tempfile::tempdir().unwrap();
        let b = bencher(dir.path(), Vec::new(), Arc::new(InMemoryTransport::new()));
        let secs = b.bench_local_disk(&Block::new(1, vec![3; 4096])).await;
        assert!(secs.is_finite());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_disk_failure_is_infinite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let b = bencher(&file, Vec::new(), Arc::new(InMemoryTransport::new()));
        assert!(b.bench_local_disk(&Block::new(1, vec![1])).await.is_infinite());
    }

    #[tokio::test]
    async fn test_failing_remote_never_fastest() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_node(1);
        let b = bencher(dir.path(), vec![RemoteNode::new(1, "")], transport);

        let result = b.bench_all(&Block::new(1, vec![0; 1024])).await;
        assert!(result.get(Tier::Remote).unwrap().is_infinite());
        assert_ne!(b.fastest_tier(), Tier::Remote);
        assert_ne!(b.fastest_tier(), Tier::GpuPrimary);
    }

    #[tokio::test]
    async fn test_no_remote_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let b = bencher(dir.path(), Vec::new(), Arc::new(InMemoryTransport::new()));
        assert!(b.bench_remote(&Block::new(1, vec![1])).await.is_infinite());
    }
}
