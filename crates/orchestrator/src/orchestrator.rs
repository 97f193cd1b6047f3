// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The top-level coordinator.
//!
//! [`BlockOrchestrator`] owns no residency data of its own: the registry
//! says where each block is, the balancer holds device-resident blocks, and
//! the host cache, disk store and remote nodes hold off-device bytes. Every
//! move follows the same order:
//!
//! ```text
//!   1. write the bytes into the destination store
//!   2. commit the move in the registry (via the balancer for device blocks)
//!   3. drop the stale copy   ── or, if step 2 failed, drop the new one
//! ```
//!
//! # Rebalance
//!
//! ```text
//!   phase 1 (device-local)   DeviceBalancer::balance with live readings;
//!                            evicted blocks land where the registry spilled them
//!   phase 2 (hierarchy)      if a device is still over the threshold, its
//!                            residents go coldest first through the tier
//!                            benchmarker: host RAM │ local disk │ remote │ stay
//! ```
//!
//! Rebalance and auto-manage cycles are serialised by an async cycle lock.
//! Per-block moves hold a claim on the block id.

use crate::benchmark::TierBenchmarker;
use crate::layers::{Layer, LayerSource, LayerStreamer};
use crate::metrics::{MetricsSnapshot, OrchestratorMetrics};
use crate::store::{DiskStore, HostRamCache};
use crate::{OrchestratorError, ServiceConfig};
use block_transport::{BlockTransport, RemoteNode};
use memory_manager::{
    Block, BlockId, ClaimSet, DeviceBalancer, DeviceInfo, Evicted, HierarchicalMemoryManager,
    MemoryError, RegistryStats, Tier, TierMove,
};
use resource_monitor::{DeviceId, DeviceMonitor, DeviceUsage};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// ── Reports ────────────────────────────────────────────────────────────────

/// Which rebalance phase moved a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancePhase {
    DeviceLocal,
    Hierarchy,
}

/// A block moved off a device by a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BlockMove {
    pub block: BlockId,
    pub device: DeviceId,
    pub to: Tier,
    pub phase: RebalancePhase,
}

/// Outcome of one rebalance cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RebalanceReport {
    /// Every move, in the order it was made.
    pub moves: Vec<BlockMove>,
    /// Readings taken after the cycle.
    pub usage: BTreeMap<DeviceId, DeviceUsage>,
    /// Whether any device still exceeds the threshold.
    pub still_over: bool,
}

impl RebalanceReport {
    pub fn moved_in(&self, phase: RebalancePhase) -> usize {
        self.moves.iter().filter(|m| m.phase == phase).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Rebalance: {} device-local evictions, {} hierarchy moves, pressure {}",
            self.moved_in(RebalancePhase::DeviceLocal),
            self.moved_in(RebalancePhase::Hierarchy),
            if self.still_over { "remains" } else { "relieved" }
        )
    }
}

/// Outcome of one auto-manage step.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AutoManageReport {
    pub prefetched: Vec<String>,
    pub unloaded: Vec<String>,
    pub rebalance: RebalanceReport,
}

/// Snapshot of the whole hierarchy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorSummary {
    pub tiers: BTreeMap<Tier, usize>,
    pub devices: Vec<DeviceInfo>,
    pub host_ram: Vec<BlockId>,
    pub local_disk_files: usize,
    pub loaded_layers: Vec<String>,
    pub remote_nodes: Vec<RemoteNode>,
    pub metrics: MetricsSnapshot,
    pub registry: RegistryStats,
}

impl OrchestratorSummary {
    /// Multi-line rendering for the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let tiers: Vec<String> = self
            .tiers
            .iter()
            .map(|(tier, n)| format!("{}={n}", tier.alias()))
            .collect();
        out.push_str(&format!("Tiers: {}\n", tiers.join(" ")));
        for d in &self.devices {
            out.push_str(&format!(
                "  {}: {}/{} blocks, {}/{} MB\n",
                d.id, d.resident_blocks, d.cache_size, d.used_mb, d.capacity_mb
            ));
        }
        out.push_str(&format!(
            "Host RAM: {} blocks, local disk: {} files, loaded layers: {}\n",
            self.host_ram.len(),
            self.local_disk_files,
            self.loaded_layers.len()
        ));
        out.push_str(&self.metrics.summary());
        out.push('\n');
        out.push_str(&self.registry.summary());
        out
    }
}

// ── Orchestrator ───────────────────────────────────────────────────────────

/// Places, moves and fetches blocks across the memory hierarchy.
pub struct BlockOrchestrator {
    monitor: Arc<dyn DeviceMonitor>,
    registry: Arc<HierarchicalMemoryManager>,
    balancer: DeviceBalancer,
    host_cache: HostRamCache,
    disk: DiskStore,
    transport: Arc<dyn BlockTransport>,
    remote_nodes: Vec<RemoteNode>,
    benchmarker: TierBenchmarker,
    streamer: LayerStreamer,
    source: Arc<dyn LayerSource>,
    claims: ClaimSet,
    cycle: tokio::sync::Mutex<()>,
    metrics: OrchestratorMetrics,
}

impl std::fmt::Debug for BlockOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockOrchestrator")
            .field("monitor", &self.monitor.name())
            .field("transport", &self.transport.name())
            .field("source", &self.source.name())
            .field("devices", &self.balancer.devices())
            .field("remote_nodes", &self.remote_nodes)
            .finish()
    }
}

impl BlockOrchestrator {
    /// Builds an orchestrator from configuration and its collaborators.
    ///
    /// Creates `<scratch_dir>/blocks` for the local-disk tier; benchmark
    /// scratch files go to `<scratch_dir>/bench`.
    pub fn new(
        config: &ServiceConfig,
        monitor: Arc<dyn DeviceMonitor>,
        transport: Arc<dyn BlockTransport>,
        source: Arc<dyn LayerSource>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let registry = Arc::new(config.create_registry());
        let balancer = DeviceBalancer::new(Arc::clone(&registry), config.device_specs());
        let claims = balancer.claims().clone();
        let disk = DiskStore::open(config.scratch_dir.join("blocks"))?;
        let benchmarker = TierBenchmarker::new(
            config.scratch_dir.join("bench"),
            config.remote_nodes.clone(),
            Arc::clone(&transport),
            config.remote_timeout(),
        );

        tracing::info!(
            "orchestrator ready: {} devices, {} remote nodes via {}, monitor={}, scratch={}",
            config.devices.len(),
            config.remote_nodes.len(),
            transport.name(),
            monitor.name(),
            config.scratch_dir.display()
        );

        Ok(Self {
            monitor,
            registry,
            balancer,
            host_cache: HostRamCache::new(),
            disk,
            transport,
            remote_nodes: config.remote_nodes.clone(),
            benchmarker,
            streamer: LayerStreamer::new(),
            source,
            claims,
            cycle: tokio::sync::Mutex::new(()),
            metrics: OrchestratorMetrics::new(),
        })
    }

    pub fn registry(&self) -> &Arc<HierarchicalMemoryManager> {
        &self.registry
    }

    pub fn balancer(&self) -> &DeviceBalancer {
        &self.balancer
    }

    pub fn host_cache(&self) -> &HostRamCache {
        &self.host_cache
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn benchmarker(&self) -> &TierBenchmarker {
        &self.benchmarker
    }

    pub fn streamer(&self) -> &LayerStreamer {
        &self.streamer
    }

    pub fn remote_nodes(&self) -> &[RemoteNode] {
        &self.remote_nodes
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ── Device operations ──────────────────────────────────────────────────

    /// Places `block` on the least utilised candidate device.
    ///
    /// Candidates default to every managed device; unmanaged ids are
    /// ignored. Devices without a reading rank after all measured ones and
    /// ties go to the lower id. Residents evicted to make room are staged
    /// off-device, and stale host/disk copies of `block` are dropped.
    pub async fn place_block(
        &self,
        block: Block,
        candidates: Option<&[DeviceId]>,
    ) -> Result<DeviceId, OrchestratorError> {
        let _claim = self.claims.claim(block.id())?;
        self.place_claimed(block, candidates).await
    }

    async fn place_claimed(
        &self,
        block: Block,
        candidates: Option<&[DeviceId]>,
    ) -> Result<DeviceId, OrchestratorError> {
        let device = self.choose_device(candidates)?;
        let id = block.id();
        let allocation = self.balancer.allocate_block(block, device)?;
        if allocation.previous.is_some_and(|t| !t.is_device()) {
            self.drop_off_device_copies(id).await;
        }

        self.metrics.record_placement();
        self.metrics.record_evictions(allocation.evicted.len());
        for evicted in allocation.evicted {
            self.stage_evicted(evicted).await;
        }
        tracing::debug!("placed {id} on {device}");
        Ok(device)
    }

    fn choose_device(&self, candidates: Option<&[DeviceId]>) -> Result<DeviceId, OrchestratorError> {
        let managed = self.balancer.devices();
        let pool: Vec<DeviceId> = match candidates {
            Some(list) => list.iter().copied().filter(|d| managed.contains(d)).collect(),
            None => managed,
        };
        let usage = self.monitor.status();
        let rank = |d: &DeviceId| match usage.get(d).and_then(DeviceUsage::percent) {
            Some(pct) => (false, pct),
            None => (true, 0.0),
        };

        pool.into_iter()
            .min_by(|a, b| {
                let (ra, rb) = (rank(a), rank(b));
                ra.0.cmp(&rb.0)
                    .then(ra.1.total_cmp(&rb.1))
                    .then(a.cmp(b))
            })
            .ok_or_else(|| {
                let listed = candidates
                    .map(|c| c.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
                    .unwrap_or_else(|| "all".to_string());
                OrchestratorError::NoDevice(listed)
            })
    }

    /// Removes a block from a device and from the registry. Idempotent.
    pub async fn release_block(
        &self,
        id: BlockId,
        device: DeviceId,
    ) -> Result<Option<Block>, OrchestratorError> {
        let _claim = self.claims.claim(id)?;
        Ok(self.balancer.release_block(id, device)?)
    }

    /// Moves a resident block between devices. On failure it stays on `src`.
    pub async fn migrate_block(
        &self,
        id: BlockId,
        src: DeviceId,
        dst: DeviceId,
    ) -> Result<(), OrchestratorError> {
        let _claim = self.claims.claim(id)?;
        let evicted = self.balancer.migrate_block(id, src, dst)?;
        self.metrics.record_migration();
        self.metrics.record_evictions(evicted.len());
        for e in evicted {
            self.stage_evicted(e).await;
        }
        Ok(())
    }

    /// Forgets a block wherever it is: device, registry, host RAM and disk.
    /// Remote copies are left on their nodes.
    pub async fn drop_block(&self, id: BlockId) -> Result<bool, OrchestratorError> {
        let _claim = self.claims.claim(id)?;
        let removed = match self.balancer.resident_block(id) {
            Some((device, _)) => self.balancer.release_block(id, device)?.is_some(),
            None => self.registry.deregister(id).is_some(),
        };
        self.drop_off_device_copies(id).await;
        Ok(removed)
    }

    // ── Rebalance ──────────────────────────────────────────────────────────

    /// Relieves every device above `threshold` (%), considering all
    /// resident blocks.
    pub async fn rebalance(
        &self,
        threshold: f64,
        host_ram_limit: usize,
    ) -> Result<RebalanceReport, OrchestratorError> {
        let _cycle = self.cycle.lock().await;
        self.rebalance_locked(None, threshold, host_ram_limit).await
    }

    /// Like [`rebalance`](Self::rebalance) but only `ids` may move.
    pub async fn rebalance_blocks(
        &self,
        ids: &[BlockId],
        threshold: f64,
        host_ram_limit: usize,
    ) -> Result<RebalanceReport, OrchestratorError> {
        let _cycle = self.cycle.lock().await;
        let eligible: HashSet<BlockId> = ids.iter().copied().collect();
        self.rebalance_locked(Some(&eligible), threshold, host_ram_limit)
            .await
    }

    async fn rebalance_locked(
        &self,
        eligible: Option<&HashSet<BlockId>>,
        threshold: f64,
        host_ram_limit: usize,
    ) -> Result<RebalanceReport, OrchestratorError> {
        self.metrics.record_rebalance();
        let mut report = RebalanceReport::default();

        let usage = self.monitor.status();
        let outcome = self.balancer.balance(eligible, &usage, threshold);
        self.metrics.record_evictions(outcome.evicted.len());
        for evicted in outcome.evicted {
            report.moves.push(BlockMove {
                block: evicted.block.id(),
                device: evicted.device,
                to: evicted.to,
                phase: RebalancePhase::DeviceLocal,
            });
            self.stage_evicted(evicted).await;
        }

        let fresh = self.monitor.status();
        let over: HashSet<DeviceId> = fresh
            .iter()
            .filter(|(_, u)| u.exceeds(threshold))
            .map(|(d, _)| *d)
            .collect();
        if !over.is_empty() {
            let candidates = self
                .balancer
                .resident_ids()
                .into_iter()
                .filter(|(d, id)| over.contains(d) && eligible.map_or(true, |s| s.contains(id)))
                .map(|(_, id)| id);
            for id in self.registry.coldest_first(candidates) {
                if let Some(mv) = self.route_by_latency(id, host_ram_limit).await {
                    report.moves.push(mv);
                }
            }
        }

        report.usage = self.monitor.status();
        report.still_over = report.usage.values().any(|u| u.exceeds(threshold));
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Moves one resident block to the fastest reachable off-device tier.
    async fn route_by_latency(&self, id: BlockId, host_ram_limit: usize) -> Option<BlockMove> {
        let Ok(_claim) = self.claims.claim(id) else {
            tracing::debug!("{id} is being moved elsewhere, skipping");
            return None;
        };
        let (device, block) = self.balancer.resident_block(id)?;

        self.benchmarker.bench_all(&block).await;
        let target = match self.benchmarker.fastest_tier() {
            Tier::HostRam if self.host_cache.len() < host_ram_limit => Tier::HostRam,
            Tier::HostRam => {
                tracing::debug!("host RAM holds {} blocks, {id} stays", self.host_cache.len());
                return None;
            }
            Tier::LocalDisk => Tier::LocalDisk,
            Tier::Remote => Tier::Remote,
            Tier::GpuPrimary | Tier::GpuCache => {
                tracing::debug!("no off-device tier reachable, {id} stays");
                return None;
            }
        };

        match self.move_off_device(&block, target).await {
            Ok(_) => {
                self.metrics.record_hierarchy_move(target);
                tracing::info!("{id} -> {target} (from {device})");
                Some(BlockMove {
                    block: id,
                    device,
                    to: target,
                    phase: RebalancePhase::Hierarchy,
                })
            }
            Err(e) => {
                tracing::warn!("cannot move {id} to {target}: {e}");
                None
            }
        }
    }

    // ── Fetch ──────────────────────────────────────────────────────────────

    /// Looks a block up in host RAM, then local disk, then each remote node
    /// in order. `None` is a miss.
    pub async fn fetch_block(&self, id: BlockId) -> Option<Block> {
        let found = if let Some(block) = self.host_cache.get(id) {
            Some((Tier::HostRam, block))
        } else if let Some(block) = self.read_disk(id).await {
            Some((Tier::LocalDisk, block))
        } else {
            self.fetch_remote(id).await.map(|b| (Tier::Remote, b))
        };

        self.metrics.record_fetch(found.as_ref().map(|(tier, _)| *tier));
        match found {
            Some((tier, block)) => {
                tracing::debug!("fetched {id} from {tier}");
                if let Err(e) = self.touch_block(id) {
                    tracing::debug!("fetched {id} is not registered: {e}");
                }
                Some(block)
            }
            None => {
                tracing::debug!("fetch miss for {id}");
                None
            }
        }
    }

    /// Records an access and lets the hotness policy schedule a promotion.
    pub fn touch_block(&self, id: BlockId) -> Result<Option<Tier>, OrchestratorError> {
        self.registry.touch(id)?;
        Ok(self.registry.promote_policy(id)?)
    }

    // ── Policy ─────────────────────────────────────────────────────────────

    /// Demotes a block one tier if its device is above `over_pct`.
    ///
    /// Leaving the device goes through the balancer so the resident set and
    /// the bytes follow the registry.
    pub async fn demote_if_needed(
        &self,
        id: BlockId,
        over_pct: f64,
    ) -> Result<Option<TierMove>, OrchestratorError> {
        let _claim = self.claims.claim(id)?;
        let record = self.registry.record(id).ok_or(MemoryError::UnknownBlock(id))?;
        let Some(device) = record.device else {
            return Ok(None);
        };
        let usage = self.monitor.usage(device);
        if !usage.exceeds(over_pct) {
            return Ok(None);
        }
        let Some(target) = record.tier.demote() else {
            return Ok(None);
        };

        let mv = if target.is_device() {
            if !self.registry.fits(target, record.size_mb) {
                tracing::debug!("{target} is full, {id} stays in {}", record.tier);
                return Ok(None);
            }
            self.registry.demote_if_needed(id, usage, over_pct)?
        } else {
            let Some((_, block)) = self.balancer.resident_block(id) else {
                return Ok(None);
            };
            Some(self.move_off_device(&block, target).await?)
        };

        if let Some(mv) = &mv {
            self.metrics.record_demotion();
            tracing::info!("demoted {id} {} -> {} ({device} at {usage})", mv.from, mv.to);
        }
        Ok(mv)
    }

    /// Executes the promotions the hotness policy scheduled, in order.
    ///
    /// Stale entries (block gone or already moved) are skipped; a failed
    /// promotion is logged and leaves the block where it was.
    pub async fn apply_promotions(&self) -> Vec<TierMove> {
        let mut applied = Vec::new();
        for (id, target) in self.registry.take_scheduled_promotions() {
            let Ok(_claim) = self.claims.claim(id) else {
                tracing::debug!("{id} busy, promotion to {target} dropped");
                continue;
            };
            let Some(current) = self.registry.get_tier(id) else {
                continue;
            };
            if current.promote() != Some(target) {
                tracing::debug!("stale promotion of {id} ({current} -> {target})");
                continue;
            }
            match self.promote_one(id, current, target).await {
                Ok(mv) => {
                    self.metrics.record_promotion();
                    tracing::info!("promoted {id} {} -> {}", mv.from, mv.to);
                    applied.push(mv);
                }
                Err(e) => tracing::warn!("promotion of {id} to {target} failed: {e}"),
            }
        }
        applied
    }

    async fn promote_one(
        &self,
        id: BlockId,
        current: Tier,
        target: Tier,
    ) -> Result<TierMove, OrchestratorError> {
        if current.is_device() {
            // Both tiers are on the device; only the registry changes.
            let moves = self.registry.migrate(id, target)?;
            return Ok(moves
                .into_iter()
                .find(|m| m.block == id)
                .unwrap_or(TierMove {
                    block: id,
                    from: current,
                    to: target,
                }));
        }

        let block = self
            .read_copy(id, current)
            .await
            .ok_or_else(|| MemoryError::Migration {
                block: id,
                target,
                reason: format!("no copy found in {current}"),
            })?;

        if target.is_device() {
            let device = self.place_claimed(block, None).await?;
            let to = self.registry.get_tier(id).unwrap_or(Tier::GpuPrimary);
            tracing::debug!("{id} back on {device}");
            return Ok(TierMove {
                block: id,
                from: current,
                to,
            });
        }

        self.write_copy(&block, target).await?;
        let moves = match self.registry.migrate(id, target) {
            Ok(moves) => moves,
            Err(e) => {
                self.discard_staged(id, target).await;
                return Err(e.into());
            }
        };
        self.remove_copy(id, current).await;
        let displaced: Vec<TierMove> = moves.into_iter().filter(|m| m.block != id).collect();
        self.relocate_displaced(&displaced).await;
        Ok(TierMove {
            block: id,
            from: current,
            to: target,
        })
    }

    // ── Layers ─────────────────────────────────────────────────────────────

    /// One streaming step over the active `window` of layers.
    ///
    /// Prefetches the first `lookahead` layers of the window that are not
    /// loaded, rebalances over the loaded layers, then unloads every loaded
    /// layer that left the window.
    pub async fn auto_manage(
        &self,
        window: &[Layer],
        lookahead: usize,
        threshold: f64,
        host_ram_limit: usize,
    ) -> Result<AutoManageReport, OrchestratorError> {
        let _cycle = self.cycle.lock().await;
        let mut report = AutoManageReport::default();

        for layer in self.streamer.to_prefetch(window, lookahead) {
            let block = self.source.load(layer)?;
            let id = block.id();
            match self.place_block(block, None).await {
                Ok(device) => {
                    tracing::debug!("prefetched {} as {id} on {device}", layer.name);
                    self.streamer.mark_loaded(layer, id);
                    report.prefetched.push(layer.name.clone());
                }
                Err(e) => tracing::warn!("prefetch of {} failed: {e}", layer.name),
            }
        }

        let loaded: HashSet<BlockId> = self.streamer.loaded_blocks().into_iter().collect();
        report.rebalance = self
            .rebalance_locked(Some(&loaded), threshold, host_ram_limit)
            .await?;

        for (name, id) in self.streamer.retain_window(window) {
            match self.drop_block(id).await {
                Ok(_) => report.unloaded.push(name),
                Err(e) => tracing::warn!("cannot unload {name} ({id}): {e}"),
            }
        }
        Ok(report)
    }

    pub fn summary(&self) -> OrchestratorSummary {
        OrchestratorSummary {
            tiers: self.registry.summary(),
            devices: self.balancer.infos(),
            host_ram: self.host_cache.ids(),
            local_disk_files: self.disk.len(),
            loaded_layers: self.streamer.loaded_names(),
            remote_nodes: self.remote_nodes.clone(),
            metrics: self.metrics.snapshot(),
            registry: self.registry.stats(),
        }
    }

    // ── Byte movement ──────────────────────────────────────────────────────

    /// Writes a copy, evicts through the balancer, and cleans up on failure.
    async fn move_off_device(&self, block: &Block, tier: Tier) -> Result<TierMove, OrchestratorError> {
        let id = block.id();
        let from = self.registry.get_tier(id).unwrap_or(Tier::GpuPrimary);
        self.write_copy(block, tier).await?;

        match self.balancer.evict_to(id, tier) {
            Ok((_, displaced)) => {
                self.relocate_displaced(&displaced).await;
                Ok(TierMove { block: id, from, to: tier })
            }
            Err(e) => {
                self.discard_staged(id, tier).await;
                Err(e.into())
            }
        }
    }

    /// Puts an evicted block's bytes where the registry sent it. The
    /// eviction's claim is held until the copy is written.
    ///
    /// A remote spill that no node accepts falls back to local disk.
    async fn stage_evicted(&self, evicted: Evicted) {
        let Evicted {
            block,
            device,
            to,
            claim: _claim,
        } = evicted;
        let id = block.id();
        match self.write_copy(&block, to).await {
            Ok(()) => tracing::debug!("staged {id} from {device} in {to}"),
            Err(e) if to == Tier::Remote => {
                tracing::warn!("cannot stage {id} remotely ({e}), using local disk");
                match self.registry.migrate(id, Tier::LocalDisk) {
                    Ok(moves) => {
                        if let Err(e) = self.disk.put(&block).await {
                            tracing::error!("{id} has no copy in {}: {e}", Tier::LocalDisk);
                        }
                        let displaced: Vec<TierMove> =
                            moves.into_iter().filter(|m| m.block != id).collect();
                        self.relocate_displaced(&displaced).await;
                    }
                    Err(e) => tracing::error!("cannot re-home {id}: {e}"),
                }
            }
            Err(e) => tracing::error!("{id} has no copy in {to}: {e}"),
        }
    }

    async fn write_copy(&self, block: &Block, tier: Tier) -> Result<(), OrchestratorError> {
        match tier {
            Tier::HostRam => {
                self.host_cache.insert(block.clone());
                Ok(())
            }
            Tier::LocalDisk => {
                let path = self.disk.put(block).await?;
                tracing::debug!("persisted {} to {}", block.id(), path.display());
                Ok(())
            }
            Tier::Remote => match self.send_remote(block).await {
                Some(node) => {
                    tracing::debug!("sent {} to {node}", block.id());
                    Ok(())
                }
                None => Err(OrchestratorError::RemoteUnavailable(block.id())),
            },
            Tier::GpuPrimary | Tier::GpuCache => Ok(()),
        }
    }

    async fn read_copy(&self, id: BlockId, tier: Tier) -> Option<Block> {
        match tier {
            Tier::HostRam => self.host_cache.get(id),
            Tier::LocalDisk => self.read_disk(id).await,
            Tier::Remote => self.fetch_remote(id).await,
            Tier::GpuPrimary | Tier::GpuCache => self.balancer.resident_block(id).map(|(_, b)| b),
        }
    }

    async fn remove_copy(&self, id: BlockId, tier: Tier) {
        match tier {
            Tier::HostRam => {
                self.host_cache.remove(id);
            }
            Tier::LocalDisk => {
                if let Err(e) = self.disk.remove(id).await {
                    tracing::warn!("cannot remove disk copy of {id}: {e}");
                }
            }
            // Remote copies are not authoritative and stay on their node.
            Tier::Remote | Tier::GpuPrimary | Tier::GpuCache => {}
        }
    }

    /// Drops a copy written for a move that did not commit, unless the
    /// registry meanwhile placed the block in that tier.
    async fn discard_staged(&self, id: BlockId, tier: Tier) {
        if self.registry.get_tier(id) != Some(tier) {
            self.remove_copy(id, tier).await;
        }
    }

    async fn drop_off_device_copies(&self, id: BlockId) {
        self.remove_copy(id, Tier::HostRam).await;
        self.remove_copy(id, Tier::LocalDisk).await;
    }

    /// Moves bytes for blocks the registry displaced one tier down.
    async fn relocate_displaced(&self, moves: &[TierMove]) {
        for mv in moves {
            if mv.to.is_device() {
                continue;
            }
            if mv.from.is_device() {
                tracing::warn!("{} displaced off-device from {}; bytes stay resident", mv.block, mv.from);
                continue;
            }
            let Some(block) = self.read_copy(mv.block, mv.from).await else {
                tracing::error!("{} moved {} -> {} but no copy was found", mv.block, mv.from, mv.to);
                continue;
            };
            match self.write_copy(&block, mv.to).await {
                Ok(()) => {
                    self.remove_copy(mv.block, mv.from).await;
                    tracing::debug!("displaced {} {} -> {}", mv.block, mv.from, mv.to);
                }
                Err(e) => tracing::error!("cannot displace {} to {}: {e}", mv.block, mv.to),
            }
        }
    }

    async fn read_disk(&self, id: BlockId) -> Option<Block> {
        match self.disk.get(id).await {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("cannot read disk copy of {id}: {e}");
                None
            }
        }
    }

    /// Tries each remote node in order; the first success wins.
    async fn send_remote(&self, block: &Block) -> Option<&RemoteNode> {
        for node in &self.remote_nodes {
            match self.transport.send(node, block).await {
                Ok(()) => return Some(node),
                Err(e) => {
                    self.metrics.record_remote_failure();
                    tracing::warn!("sending {} to {node} failed: {e}", block.id());
                }
            }
        }
        None
    }

    async fn fetch_remote(&self, id: BlockId) -> Option<Block> {
        for node in &self.remote_nodes {
            match self.transport.fetch(node, id).await {
                Ok(Some(block)) => return Some(block),
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_remote_failure();
                    tracing::warn!("fetching {id} from {node} failed: {e}");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::layers::{synthetic_stack, SyntheticSource};
    use block_transport::InMemoryTransport;
    use memory_manager::Capacity;
    use resource_monitor::PushMonitor;

    struct Fixture {
        orch: BlockOrchestrator,
        monitor: Arc<PushMonitor>,
        transport: Arc<InMemoryTransport>,
        _dir: tempfile::TempDir,
    }

    fn fixture(devices: &[(u32, u64, usize)], nodes: &[u32], host_ram_limit: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            scratch_dir: dir.path().to_path_buf(),
            host_ram_limit,
            devices: devices
                .iter()
                .map(|&(id, mb, n)| DeviceConfig {
                    id: DeviceId(id),
                    capacity: Capacity::from_mb(mb),
                    cache_size: Some(n),
                })
                .collect(),
            remote_nodes: nodes.iter().map(|&id| RemoteNode::new(id, "")).collect(),
            transport: crate::TransportKind::SharedPath,
            shared_root: Some(dir.path().join("shared")),
            ..ServiceConfig::default()
        };
        let monitor = Arc::new(PushMonitor::new());
        let transport = Arc::new(InMemoryTransport::new());
        let orch = BlockOrchestrator::new(
            &config,
            monitor.clone(),
            transport.clone(),
            Arc::new(SyntheticSource::new(64)),
        )
        .unwrap();
        Fixture {
            orch,
            monitor,
            transport,
            _dir: dir,
        }
    }

    fn block(size_mb: u32) -> Block {
        Block::new(size_mb, vec![size_mb as u8; 64])
    }

    #[tokio::test]
    async fn test_place_prefers_least_loaded() {
        let f = fixture(&[(0, 100, 4), (1, 100, 4), (2, 100, 4)], &[], 10);
        f.monitor.set(DeviceId(0), 70.0);
        f.monitor.set(DeviceId(1), 20.0);
        f.monitor.mark_unavailable(DeviceId(2));

        let b = block(4);
        assert_eq!(f.orch.place_block(b.clone(), None).await.unwrap(), DeviceId(1));
        assert_eq!(f.orch.registry().device_of(b.id()), Some(DeviceId(1)));
        assert_eq!(f.orch.metrics().placements, 1);
    }

    #[tokio::test]
    async fn test_unavailable_ranks_last_and_ties_by_id() {
        let f = fixture(&[(0, 100, 4), (1, 100, 4), (2, 100, 4)], &[], 10);
        f.monitor.mark_unavailable(DeviceId(0));
        f.monitor.set(DeviceId(1), 50.0);
        f.monitor.set(DeviceId(2), 50.0);
        assert_eq!(f.orch.place_block(block(1), None).await.unwrap(), DeviceId(1));

        let only_unavailable = [DeviceId(0)];
        assert_eq!(
            f.orch.place_block(block(1), Some(&only_unavailable)).await.unwrap(),
            DeviceId(0)
        );
        let unmanaged = [DeviceId(9)];
        assert!(matches!(
            f.orch.place_block(block(1), Some(&unmanaged)).await,
            Err(OrchestratorError::NoDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_evicted_victims_are_staged() {
        let f = fixture(&[(0, 100, 2)], &[], 10);
        let (a, b, c) = (block(1), block(1), block(1));
        for blk in [&a, &b, &c] {
            f.orch.place_block(blk.clone(), None).await.unwrap();
        }
        assert_eq!(f.orch.registry().get_tier(a.id()), Some(Tier::HostRam));
        assert!(f.orch.host_cache().contains(a.id()));
        assert_eq!(f.orch.metrics().evictions, 1);

        let back = f.orch.fetch_block(a.id()).await.unwrap();
        assert_eq!(back.payload(), a.payload());
    }

    #[tokio::test]
    async fn test_spill_to_disk_when_host_ram_full() {
        let f = fixture(&[(0, 100, 1)], &[], 1);
        let blocks: Vec<Block> = (0..3).map(|_| block(2)).collect();
        for b in &blocks {
            f.orch.place_block(b.clone(), None).await.unwrap();
        }
        assert_eq!(f.orch.registry().get_tier(blocks[0].id()), Some(Tier::HostRam));
        assert_eq!(f.orch.registry().get_tier(blocks[1].id()), Some(Tier::LocalDisk));
        assert!(f.orch.disk().contains(blocks[1].id()));

        let fetched = f.orch.fetch_block(blocks[1].id()).await.unwrap();
        assert_eq!(fetched.size_mb(), 2);
        assert_eq!(f.orch.metrics().fetch_hits.local_disk, 1);
    }

    #[tokio::test]
    async fn test_replace_drops_stale_copies() {
        let f = fixture(&[(0, 100, 1)], &[], 10);
        let (a, b) = (block(1), block(1));
        f.orch.place_block(a.clone(), None).await.unwrap();
        f.orch.place_block(b.clone(), None).await.unwrap();
        assert!(f.orch.host_cache().contains(a.id()));

        f.orch.place_block(a.clone(), None).await.unwrap();
        assert_eq!(f.orch.registry().get_tier(a.id()), Some(Tier::GpuPrimary));
        assert!(!f.orch.host_cache().contains(a.id()));
        assert!(f.orch.host_cache().contains(b.id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_victim_is_never_resident_twice() {
        for _ in 0..100 {
            let f = fixture(&[(0, 1024, 1)], &[], 0);
            let orch = Arc::new(f.orch);
            let v = block(1);
            orch.place_block(v.clone(), None).await.unwrap();

            let x = block(2);
            let placing_x = tokio::spawn({
                let orch = Arc::clone(&orch);
                async move { orch.place_block(x, None).await }
            });
            let placing_v = tokio::spawn({
                let orch = Arc::clone(&orch);
                let v = v.clone();
                async move { orch.place_block(v, None).await }
            });
            for result in [placing_x.await.unwrap(), placing_v.await.unwrap()] {
                if let Err(e) = result {
                    assert!(matches!(e, OrchestratorError::MemoryError(MemoryError::BlockBusy(_))));
                }
            }

            assert!(orch.balancer().claims().is_empty());
            for (_, id) in orch.balancer().resident_ids() {
                assert!(orch.registry().get_tier(id).is_some_and(|t| t.is_device()));
                assert!(!orch.host_cache().contains(id));
                assert!(orch.disk().get(id).await.unwrap().is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_from_remote_and_miss() {
        let f = fixture(&[(0, 100, 4)], &[1, 2], 10);
        let b = block(3);
        f.transport
            .send(&RemoteNode::new(2, ""), &b)
            .await
            .unwrap();
        f.transport.fail_node(1);

        let fetched = f.orch.fetch_block(b.id()).await.unwrap();
        assert_eq!(fetched.id(), b.id());
        assert!(f.orch.fetch_block(BlockId(u64::MAX)).await.is_none());

        let m = f.orch.metrics();
        assert_eq!(m.fetch_hits.remote, 1);
        assert_eq!(m.fetch_misses, 1);
        assert_eq!(m.remote_failures, 2);
    }

    #[tokio::test]
    async fn test_migrate_between_devices() {
        let f = fixture(&[(0, 100, 4), (1, 100, 4)], &[], 10);
        let b = block(5);
        let on = f.orch.place_block(b.clone(), None).await.unwrap();
        let other = if on == DeviceId(0) { DeviceId(1) } else { DeviceId(0) };

        f.orch.migrate_block(b.id(), on, other).await.unwrap();
        assert_eq!(f.orch.registry().device_of(b.id()), Some(other));
        assert_eq!(f.orch.metrics().migrations, 1);
        assert!(f.orch.migrate_block(b.id(), on, other).await.is_err());
    }

    #[tokio::test]
    async fn test_rebalance_without_pressure_is_noop() {
        let f = fixture(&[(0, 100, 4)], &[], 10);
        f.monitor.set(DeviceId(0), 40.0);
        f.orch.place_block(block(4), None).await.unwrap();

        let report = f.orch.rebalance(90.0, 10).await.unwrap();
        assert!(report.moves.is_empty());
        assert!(!report.still_over);
    }

    #[tokio::test]
    async fn test_rebalance_blocks_respects_eligibility() {
        let f = fixture(&[(0, 100, 8)], &[], 10);
        let (a, b) = (block(4), block(4));
        f.orch.place_block(a.clone(), None).await.unwrap();
        f.orch.place_block(b.clone(), None).await.unwrap();
        f.monitor.set(DeviceId(0), 99.0);

        let report = f.orch.rebalance_blocks(&[b.id()], 90.0, 10).await.unwrap();
        assert!(report.moves.iter().all(|m| m.block == b.id()));
        assert_eq!(f.orch.registry().get_tier(a.id()), Some(Tier::GpuPrimary));
        assert!(!f.orch.registry().get_tier(b.id()).unwrap().is_device());
    }

    #[tokio::test]
    async fn test_hierarchy_phase_moves_remaining_residents() {
        let f = fixture(&[(0, 100, 8)], &[1], 10);
        let (a, b) = (block(10), block(10));
        f.orch.place_block(a.clone(), None).await.unwrap();
        f.orch.place_block(b.clone(), None).await.unwrap();
        f.monitor.set(DeviceId(0), 95.0);

        assert!(f.orch.rebalance(99.0, 10).await.unwrap().moves.is_empty());

        // The pushed reading does not drop, so phase 2 routes what phase 1 left.
        let report = f.orch.rebalance(90.0, 10).await.unwrap();
        assert_eq!(report.moves.len(), 2);
        assert_eq!(report.moves[0].block, a.id());
        assert_eq!(report.moves[0].phase, RebalancePhase::DeviceLocal);
        assert_eq!(report.moves[1].block, b.id());
        assert_eq!(report.moves[1].phase, RebalancePhase::Hierarchy);
        assert!(report.still_over);

        let tier = f.orch.registry().get_tier(b.id()).unwrap();
        assert!(!tier.is_device(), "{tier}");
        assert_eq!(report.moves[1].to, tier);
        assert!(f.orch.fetch_block(b.id()).await.is_some());
        assert_eq!(f.orch.metrics().hierarchy_moves.total(), 1);
    }

    #[tokio::test]
    async fn test_demote_if_needed() {
        let f = fixture(&[(0, 100, 4)], &[], 10);
        let b = block(2);
        f.orch.place_block(b.clone(), None).await.unwrap();

        f.monitor.set(DeviceId(0), 50.0);
        assert!(f.orch.demote_if_needed(b.id(), 90.0).await.unwrap().is_none());

        f.monitor.set(DeviceId(0), 95.0);
        let mv = f.orch.demote_if_needed(b.id(), 90.0).await.unwrap().unwrap();
        assert_eq!((mv.from, mv.to), (Tier::GpuPrimary, Tier::GpuCache));

        let mv = f.orch.demote_if_needed(b.id(), 90.0).await.unwrap().unwrap();
        assert_eq!((mv.from, mv.to), (Tier::GpuCache, Tier::HostRam));
        assert!(f.orch.host_cache().contains(b.id()));
        assert!(f.orch.balancer().resident_block(b.id()).is_none());
        assert_eq!(f.orch.metrics().demotions, 2);
    }

    #[tokio::test]
    async fn test_hot_block_promoted_back_on_device() {
        let f = fixture(&[(0, 100, 1)], &[], 10);
        let (a, b) = (block(1), block(1));
        f.orch.place_block(a.clone(), None).await.unwrap();
        f.orch.place_block(b.clone(), None).await.unwrap();
        assert_eq!(f.orch.registry().get_tier(a.id()), Some(Tier::HostRam));

        for _ in 0..5 {
            f.orch.fetch_block(a.id()).await.unwrap();
        }
        let applied = f.orch.apply_promotions().await;
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].from, Tier::HostRam);
        assert!(f.orch.registry().get_tier(a.id()).unwrap().is_device());
        assert!(!f.orch.host_cache().contains(a.id()));
        assert_eq!(f.orch.registry().get_tier(b.id()), Some(Tier::HostRam));
        assert_eq!(f.orch.metrics().promotions, 1);
    }

    #[tokio::test]
    async fn test_auto_manage_streams_window() {
        let f = fixture(&[(0, 1000, 8)], &[], 10);
        f.monitor.set(DeviceId(0), 10.0);
        let stack = synthetic_stack(6, 10);

        let r = f.orch.auto_manage(&stack[0..3], 2, 90.0, 10).await.unwrap();
        assert_eq!(r.prefetched, vec!["layer.0", "layer.1"]);
        assert!(r.unloaded.is_empty());

        let r = f.orch.auto_manage(&stack[2..5], 2, 90.0, 10).await.unwrap();
        assert_eq!(r.prefetched, vec!["layer.2", "layer.3"]);
        assert_eq!(r.unloaded, vec!["layer.0", "layer.1"]);
        assert_eq!(f.orch.streamer().loaded_names(), vec!["layer.2", "layer.3"]);
        assert_eq!(f.orch.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_block_everywhere() {
        let f = fixture(&[(0, 100, 1)], &[], 10);
        let (a, b) = (block(1), block(1));
        f.orch.place_block(a.clone(), None).await.unwrap();
        f.orch.place_block(b.clone(), None).await.unwrap();

        assert!(f.orch.drop_block(a.id()).await.unwrap());
        assert!(!f.orch.host_cache().contains(a.id()));
        assert!(f.orch.drop_block(b.id()).await.unwrap());
        assert!(!f.orch.drop_block(b.id()).await.unwrap());
        assert!(f.orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let f = fixture(&[(0, 100, 4)], &[1], 10);
        f.orch.place_block(block(3), None).await.unwrap();
        let summary = f.orch.summary();
        assert_eq!(summary.tiers[&Tier::GpuPrimary], 1);
        assert!(summary.render().contains("gpu0: 1/4 blocks"));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"gpu_primary\":1"));
    }
}
