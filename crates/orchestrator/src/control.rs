// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Periodic maintenance of the hierarchy.
//!
//! ```text
//!   every cycle_interval:
//!     rebalance(threshold, host_ram_limit)
//!     apply_promotions()
//!     decay_sweep()
//! ```
//!
//! The loop runs on a spawned tokio task and stops at the next tick boundary
//! once [`ControlLoop::stop`] is called. A cycle in flight is never cut short.

use crate::orchestrator::{BlockOrchestrator, RebalanceReport};
use crate::ServiceConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// What the loop has done so far.
#[derive(Debug, Default)]
struct LoopState {
    cycles: AtomicU64,
    promotions: AtomicU64,
    last: Mutex<Option<RebalanceReport>>,
}

/// Background rebalance / promotion / decay loop.
pub struct ControlLoop {
    orchestrator: Arc<BlockOrchestrator>,
    interval: Duration,
    threshold: f64,
    host_ram_limit: usize,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    state: Arc<LoopState>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("interval", &self.interval)
            .field("threshold", &self.threshold)
            .field("host_ram_limit", &self.host_ram_limit)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ControlLoop {
    pub fn new(
        orchestrator: Arc<BlockOrchestrator>,
        interval: Duration,
        threshold: f64,
        host_ram_limit: usize,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            threshold,
            host_ram_limit,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(LoopState::default()),
            handle: None,
        }
    }

    /// Uses the cycle interval, threshold and host RAM limit of `config`.
    pub fn from_config(orchestrator: Arc<BlockOrchestrator>, config: &ServiceConfig) -> Self {
        Self::new(
            orchestrator,
            config.cycle_interval(),
            config.rebalance_threshold_pct,
            config.host_ram_limit,
        )
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.state.cycles.load(Ordering::Relaxed)
    }

    /// Promotions applied across all cycles.
    pub fn promotions(&self) -> u64 {
        self.state.promotions.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<RebalanceReport> {
        self.state.last.lock().clone()
    }

    /// Spawns the loop. Returns `false` if it is already running.
    ///
    /// The first cycle runs immediately.
    pub fn start(&mut self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown = Arc::new(Notify::new());

        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = Arc::clone(&self.shutdown);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let (period, threshold, host_ram_limit) = (self.interval, self.threshold, self.host_ram_limit);

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!("control loop started (every {period:?}, threshold {threshold}%)");

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => {
                        run_cycle(&orchestrator, &state, threshold, host_ram_limit).await;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            tracing::info!(
                "control loop stopped after {} cycles",
                state.cycles.load(Ordering::Relaxed)
            );
        }));
        true
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.notify_one();
        if let Err(e) = handle.await {
            tracing::error!("control loop task failed: {e}");
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_cycle(
    orchestrator: &BlockOrchestrator,
    state: &LoopState,
    threshold: f64,
    host_ram_limit: usize,
) {
    match orchestrator.rebalance(threshold, host_ram_limit).await {
        Ok(report) => *state.last.lock() = Some(report),
        Err(e) => tracing::warn!("rebalance cycle failed: {e}"),
    }
    let promoted = orchestrator.apply_promotions().await;
    state.promotions.fetch_add(promoted.len() as u64, Ordering::Relaxed);
    orchestrator.registry().decay_sweep();
    state.cycles.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::layers::SyntheticSource;
    use block_transport::InMemoryTransport;
    use memory_manager::{Block, Capacity, Tier};
    use resource_monitor::{DeviceId, PushMonitor};

    fn orchestrator(dir: &std::path::Path, monitor: Arc<PushMonitor>) -> Arc<BlockOrchestrator> {
        let config = ServiceConfig {
            scratch_dir: dir.to_path_buf(),
            devices: vec![DeviceConfig {
                id: DeviceId(0),
                capacity: Capacity::from_mb(100),
                cache_size: Some(8),
            }],
            ..ServiceConfig::default()
        };
        Arc::new(
            BlockOrchestrator::new(
                &config,
                monitor,
                Arc::new(InMemoryTransport::new()),
                Arc::new(SyntheticSource::default()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_loop_runs_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(PushMonitor::new());
        let orch = orchestrator(dir.path(), monitor.clone());
        let b = Block::new(30, vec![0; 32]);
        orch.place_block(b.clone(), None).await.unwrap();
        monitor.set(DeviceId(0), 95.0);

        let mut ctl = ControlLoop::new(orch.clone(), Duration::from_millis(10), 90.0, 10);
        assert!(ctl.start());
        assert!(!ctl.start());

        tokio::time::timeout(Duration::from_secs(5), async {
            while ctl.cycles() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        ctl.stop().await;

        assert!(!ctl.is_running());
        assert_eq!(orch.registry().get_tier(b.id()), Some(Tier::HostRam));
        assert!(ctl.last_report().is_some());
        let cycles = ctl.cycles();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ctl.cycles(), cycles);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), Arc::new(PushMonitor::new()));
        let mut ctl = ControlLoop::new(orch, Duration::from_millis(10), 90.0, 10);
        ctl.stop().await;
        assert!(!ctl.is_running());
        assert_eq!(ctl.cycles(), 0);
    }
}
