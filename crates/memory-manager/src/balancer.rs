// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-device resident sets.
//!
//! [`DeviceBalancer`] keeps, for every accelerator, the bounded set of blocks
//! resident on it. It decides device-local evictions (least recently
//! accessed first) but never owns tier truth: every membership change is
//! committed through the [`HierarchicalMemoryManager`] while the balancer
//! lock is held.
//!
//! ```text
//! allocate_block(b, gpu0)
//!       │
//!       ├── claim coldest unclaimed residents until b fits (entries and MB)
//!       ├── manager.admit_with_evictions(b, gpu0, victims)   ← one registry txn
//!       └── resident set updated, victims returned as `Evicted`
//! ```
//!
//! Lock order is balancer → claims → registry. The registry never calls
//! back. Every [`Evicted`] carries the claim on its block; the caller drops
//! it once the bytes are staged.

use crate::{
    Block, BlockId, Capacity, ClaimGuard, ClaimSet, HierarchicalMemoryManager, MemoryError, Tier,
    TierMove,
};
use parking_lot::Mutex;
use resource_monitor::{DeviceId, DeviceUsage};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Static description of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSpec {
    pub id: DeviceId,
    pub capacity: Capacity,
    /// Maximum number of resident blocks.
    pub cache_size: usize,
}

impl DeviceSpec {
    pub fn new(id: DeviceId, capacity: Capacity, cache_size: usize) -> Self {
        Self {
            id,
            capacity,
            cache_size,
        }
    }
}

/// Point-in-time view of one device's resident set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub capacity_mb: u64,
    pub cache_size: usize,
    pub resident_blocks: usize,
    pub used_mb: u64,
}

/// A block pushed off a device.
#[derive(Debug)]
pub struct Evicted {
    pub block: Block,
    pub device: DeviceId,
    /// Tier the registry moved it to.
    pub to: Tier,
    /// Claim taken by the balancer; `None` when the caller already holds one.
    pub claim: Option<ClaimGuard>,
}

/// Result of a successful allocation.
#[derive(Debug, Default)]
pub struct Allocation {
    /// Tier the block was registered in before, if any.
    pub previous: Option<Tier>,
    pub evicted: Vec<Evicted>,
}

/// Result of one device-local balancing pass.
#[derive(Debug, Default)]
pub struct BalanceOutcome {
    pub evicted: Vec<Evicted>,
    /// Estimated utilisation per device after the pass.
    pub usage_after: BTreeMap<DeviceId, DeviceUsage>,
}

#[derive(Debug)]
struct DeviceState {
    spec: DeviceSpec,
    resident: Vec<Block>,
    used_mb: u64,
}

impl DeviceState {
    fn new(spec: DeviceSpec) -> Self {
        Self {
            spec,
            resident: Vec::new(),
            used_mb: 0,
        }
    }

    fn contains(&self, id: BlockId) -> bool {
        self.resident.iter().any(|b| b.id() == id)
    }

    fn get(&self, id: BlockId) -> Option<&Block> {
        self.resident.iter().find(|b| b.id() == id)
    }

    fn remove(&mut self, id: BlockId) -> Option<Block> {
        let pos = self.resident.iter().position(|b| b.id() == id)?;
        let block = self.resident.remove(pos);
        self.used_mb = self.used_mb.saturating_sub(u64::from(block.size_mb()));
        Some(block)
    }

    fn push(&mut self, block: Block) {
        self.used_mb += u64::from(block.size_mb());
        self.resident.push(block);
    }

    fn capacity_mb(&self) -> u64 {
        self.spec.capacity.as_mb()
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.spec.id,
            capacity_mb: self.capacity_mb(),
            cache_size: self.spec.cache_size,
            resident_blocks: self.resident.len(),
            used_mb: self.used_mb,
        }
    }

    fn capacity_error(&self, requested_mb: u64) -> MemoryError {
        MemoryError::Capacity {
            location: self.spec.id.to_string(),
            requested_mb,
            available_mb: self.capacity_mb().saturating_sub(self.used_mb),
        }
    }
}

/// Bounded per-device caches of resident blocks.
#[derive(Debug)]
pub struct DeviceBalancer {
    manager: Arc<HierarchicalMemoryManager>,
    devices: Mutex<BTreeMap<DeviceId, DeviceState>>,
    claims: ClaimSet,
}

impl DeviceBalancer {
    pub fn new(
        manager: Arc<HierarchicalMemoryManager>,
        devices: impl IntoIterator<Item = DeviceSpec>,
    ) -> Self {
        let devices = devices
            .into_iter()
            .map(|spec| (spec.id, DeviceState::new(spec)))
            .collect();
        Self {
            manager,
            devices: Mutex::new(devices),
            claims: ClaimSet::new(),
        }
    }

    pub fn manager(&self) -> &Arc<HierarchicalMemoryManager> {
        &self.manager
    }

    /// Claims shared with whoever moves block bytes. Claimed residents are
    /// never chosen as victims.
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Adds a device. Returns `false` if it was already managed.
    pub fn add_device(&self, spec: DeviceSpec) -> bool {
        let mut devices = self.devices.lock();
        if devices.contains_key(&spec.id) {
            return false;
        }
        devices.insert(spec.id, DeviceState::new(spec));
        true
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.lock().keys().copied().collect()
    }

    pub fn device_info(&self, device: DeviceId) -> Option<DeviceInfo> {
        self.devices.lock().get(&device).map(DeviceState::info)
    }

    pub fn infos(&self) -> Vec<DeviceInfo> {
        self.devices.lock().values().map(DeviceState::info).collect()
    }

    /// Finds the device holding `id`.
    pub fn resident_block(&self, id: BlockId) -> Option<(DeviceId, Block)> {
        self.devices
            .lock()
            .values()
            .find_map(|s| s.get(id).map(|b| (s.spec.id, b.clone())))
    }

    pub fn resident_on(&self, device: DeviceId) -> Vec<Block> {
        self.devices
            .lock()
            .get(&device)
            .map(|s| s.resident.clone())
            .unwrap_or_default()
    }

    /// Every resident `(device, block)` pair.
    pub fn resident_ids(&self) -> Vec<(DeviceId, BlockId)> {
        self.devices
            .lock()
            .values()
            .flat_map(|s| s.resident.iter().map(|b| (s.spec.id, b.id())))
            .collect()
    }

    /// Claims the coldest residents of `state` that must leave for a block of
    /// `size_mb` to fit. Residents the registry no longer knows are purged;
    /// residents claimed by another move are passed over.
    ///
    /// # Errors
    /// [`MemoryError::BlockBusy`] if the block only fits by evicting a
    /// claimed resident.
    fn select_victims(
        &self,
        state: &mut DeviceState,
        size_mb: u64,
    ) -> Result<Vec<ClaimGuard>, MemoryError> {
        let ids: Vec<BlockId> = state.resident.iter().map(Block::id).collect();
        let ordered = self.manager.coldest_first(ids.iter().copied());

        if ordered.len() != ids.len() {
            let known: HashSet<BlockId> = ordered.iter().copied().collect();
            for stale in ids.iter().filter(|id| !known.contains(id)) {
                tracing::warn!("{stale} resident on {} but unregistered, dropping", state.spec.id);
                state.remove(*stale);
            }
        }

        let mut count = state.resident.len();
        let mut used = state.used_mb;
        let fits = |count: usize, used: u64| {
            count < state.spec.cache_size && used + size_mb <= state.capacity_mb()
        };
        let mut victims = Vec::new();
        let mut busy = None;
        for id in ordered {
            if fits(count, used) {
                break;
            }
            let Ok(claim) = self.claims.claim(id) else {
                busy.get_or_insert(id);
                continue;
            };
            let victim_size = state.get(id).map_or(0, |b| u64::from(b.size_mb()));
            count -= 1;
            used = used.saturating_sub(victim_size);
            victims.push(claim);
        }

        if fits(count, used) {
            Ok(victims)
        } else {
            Err(busy.map_or_else(|| state.capacity_error(size_mb), MemoryError::BlockBusy))
        }
    }

    /// Makes `block` resident on `device`, evicting the least recently
    /// accessed residents until it fits.
    ///
    /// # Errors
    /// - [`MemoryError::UnknownDevice`] for an unmanaged device.
    /// - [`MemoryError::Capacity`] if the block alone exceeds the device.
    /// - [`MemoryError::DuplicateBlock`] if it is resident on another device.
    /// - [`MemoryError::BlockBusy`] if room depends on a claimed resident.
    pub fn allocate_block(&self, block: Block, device: DeviceId) -> Result<Allocation, MemoryError> {
        let mut devices = self.devices.lock();
        let id = block.id();
        let size = u64::from(block.size_mb());

        if let Some(owner) = devices.values().find(|s| s.contains(id)) {
            if owner.spec.id == device {
                return Ok(Allocation {
                    previous: Some(Tier::GpuPrimary),
                    evicted: Vec::new(),
                });
            }
            return Err(MemoryError::DuplicateBlock {
                block: id,
                existing: Tier::GpuPrimary,
            });
        }

        let state = devices
            .get_mut(&device)
            .ok_or(MemoryError::UnknownDevice(device))?;
        if size > state.capacity_mb() || state.spec.cache_size == 0 {
            return Err(state.capacity_error(size));
        }

        let victims = self.select_victims(state, size)?;
        let ids: Vec<BlockId> = victims.iter().map(ClaimGuard::block).collect();
        let admission = self.manager.admit_with_evictions(&block, device, &ids)?;
        let evicted = Self::take_victims(state, victims, &admission.spilled);
        state.push(block);

        tracing::debug!(
            "allocated {id} on {device} ({} MB used of {}, {} evicted)",
            state.used_mb,
            state.spec.capacity,
            evicted.len()
        );
        Ok(Allocation {
            previous: admission.previous,
            evicted,
        })
    }

    /// Removes the victims from the resident set, pairing each with its
    /// registry move.
    fn take_victims(state: &mut DeviceState, victims: Vec<ClaimGuard>, moves: &[TierMove]) -> Vec<Evicted> {
        victims
            .into_iter()
            .filter_map(|claim| {
                let victim = claim.block();
                let block = state.remove(victim)?;
                match moves.iter().find(|m| m.block == victim) {
                    Some(mv) => Some(Evicted {
                        block,
                        device: state.spec.id,
                        to: mv.to,
                        claim: Some(claim),
                    }),
                    None => {
                        tracing::warn!("{victim} was resident but already off-device");
                        None
                    }
                }
            })
            .collect()
    }

    /// Removes `id` from `device` and from the registry. Idempotent.
    pub fn release_block(&self, id: BlockId, device: DeviceId) -> Result<Option<Block>, MemoryError> {
        let mut devices = self.devices.lock();
        let state = devices
            .get_mut(&device)
            .ok_or(MemoryError::UnknownDevice(device))?;
        let Some(block) = state.remove(id) else {
            return Ok(None);
        };
        self.manager.deregister(id);
        tracing::debug!("released {id} from {device}");
        Ok(Some(block))
    }

    /// Moves a resident block between devices.
    ///
    /// The destination is checked and made room on before the source is
    /// touched; on any error the block stays on `src`.
    pub fn migrate_block(
        &self,
        id: BlockId,
        src: DeviceId,
        dst: DeviceId,
    ) -> Result<Vec<Evicted>, MemoryError> {
        let mut devices = self.devices.lock();
        if !devices.contains_key(&dst) {
            return Err(MemoryError::UnknownDevice(dst));
        }
        let block = devices
            .get(&src)
            .ok_or(MemoryError::UnknownDevice(src))?
            .get(id)
            .cloned()
            .ok_or(MemoryError::NotResident { block: id, device: src })?;
        if src == dst {
            return Ok(Vec::new());
        }

        let size = u64::from(block.size_mb());
        let evicted = {
            let target = devices
                .get_mut(&dst)
                .ok_or(MemoryError::UnknownDevice(dst))?;
            if size > target.capacity_mb() || target.spec.cache_size == 0 {
                return Err(target.capacity_error(size));
            }
            let victims = self.select_victims(target, size)?;
            let ids: Vec<BlockId> = victims.iter().map(ClaimGuard::block).collect();
            let moves = self.manager.spill_many(&ids)?;
            let evicted = Self::take_victims(target, victims, &moves);
            target.push(block);
            evicted
        };
        if let Some(source) = devices.get_mut(&src) {
            source.remove(id);
        }
        self.manager.set_device(id, Some(dst))?;

        tracing::debug!("migrated {id} {src} -> {dst} ({} evicted)", evicted.len());
        Ok(evicted)
    }

    /// Moves a resident block to an off-device tier through the registry.
    ///
    /// Returns the eviction and any block the registry displaced one tier
    /// further down to make room.
    pub fn evict_to(&self, id: BlockId, tier: Tier) -> Result<(Evicted, Vec<TierMove>), MemoryError> {
        if tier.is_device() {
            return Err(MemoryError::Migration {
                block: id,
                target: tier,
                reason: "eviction target must be off-device".to_string(),
            });
        }
        let mut devices = self.devices.lock();
        let state = devices
            .values_mut()
            .find(|s| s.contains(id))
            .ok_or(MemoryError::UnknownBlock(id))?;

        let moves = self.manager.migrate(id, tier)?;
        let device = state.spec.id;
        let block = state
            .remove(id)
            .ok_or(MemoryError::NotResident { block: id, device })?;
        let displaced = moves.into_iter().filter(|m| m.block != id).collect();

        tracing::debug!("evicted {id} from {device} to {tier}");
        Ok((
            Evicted {
                block,
                device,
                to: tier,
                claim: None,
            },
            displaced,
        ))
    }

    /// Device-local pressure relief.
    ///
    /// For every device whose reading exceeds `threshold_pct`, spills the
    /// least recently accessed unclaimed `eligible` residents (all residents when
    /// `eligible` is `None`) until the estimated utilisation drops to the
    /// threshold or nothing evictable remains. Each eviction is estimated
    /// to free `size / capacity` of the device. Unavailable devices are left
    /// alone.
    pub fn balance(
        &self,
        eligible: Option<&HashSet<BlockId>>,
        usage: &BTreeMap<DeviceId, DeviceUsage>,
        threshold_pct: f64,
    ) -> BalanceOutcome {
        let mut devices = self.devices.lock();
        let mut outcome = BalanceOutcome::default();

        for (device, state) in devices.iter_mut() {
            let reading = usage.get(device).copied().unwrap_or(DeviceUsage::Unavailable);
            let Some(mut estimate) = reading.percent() else {
                outcome.usage_after.insert(*device, reading);
                continue;
            };

            let candidates = self.manager.coldest_first(
                state
                    .resident
                    .iter()
                    .map(Block::id)
                    .filter(|id| eligible.map_or(true, |set| set.contains(id))),
            );

            let before = outcome.evicted.len();
            for candidate in candidates {
                if estimate <= threshold_pct {
                    break;
                }
                let Ok(claim) = self.claims.claim(candidate) else {
                    tracing::debug!("{candidate} is being moved elsewhere, skipping");
                    continue;
                };
                match self.manager.spill(candidate) {
                    Ok(Some(mv)) => {
                        if let Some(block) = state.remove(candidate) {
                            estimate -= f64::from(block.size_mb()) / state.capacity_mb() as f64 * 100.0;
                            outcome.evicted.push(Evicted {
                                block,
                                device: *device,
                                to: mv.to,
                                claim: Some(claim),
                            });
                        }
                    }
                    Ok(None) => {
                        state.remove(candidate);
                    }
                    Err(e) => {
                        tracing::warn!("balance on {device} stopped: {e}");
                        break;
                    }
                }
            }

            let freed = outcome.evicted.len() - before;
            if freed > 0 {
                tracing::info!(
                    "balanced {device}: {reading} -> ~{:.1}% ({freed} evicted)",
                    estimate.max(0.0)
                );
            }
            outcome
                .usage_after
                .insert(*device, DeviceUsage::measured(estimate));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TierLimit;

    fn setup(specs: &[(u32, u64, usize)]) -> (Arc<HierarchicalMemoryManager>, DeviceBalancer) {
        let mgr = Arc::new(HierarchicalMemoryManager::default());
        let balancer = DeviceBalancer::new(
            Arc::clone(&mgr),
            specs
                .iter()
                .map(|&(id, mb, n)| DeviceSpec::new(DeviceId(id), Capacity::from_mb(mb), n)),
        );
        (mgr, balancer)
    }

    fn block(size_mb: u32) -> Block {
        Block::new(size_mb, vec![1, 2, 3])
    }

    #[test]
    fn test_allocate_registers_on_device() {
        let (mgr, bal) = setup(&[(0, 100, 4)]);
        let b = block(10);
        let alloc = bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        assert!(alloc.evicted.is_empty());
        assert_eq!(alloc.previous, None);
        assert_eq!(mgr.get_tier(b.id()), Some(Tier::GpuPrimary));
        assert_eq!(mgr.device_of(b.id()), Some(DeviceId(0)));
        assert_eq!(bal.device_info(DeviceId(0)).unwrap().used_mb, 10);
    }

    #[test]
    fn test_allocate_evicts_coldest_by_entries() {
        let (mgr, bal) = setup(&[(0, 100, 2)]);
        let a = block(1);
        let b = block(1);
        bal.allocate_block(a.clone(), DeviceId(0)).unwrap();
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        mgr.touch(a.id()).unwrap();

        let c = block(1);
        let alloc = bal.allocate_block(c, DeviceId(0)).unwrap();
        assert_eq!(alloc.evicted.len(), 1);
        assert_eq!(alloc.evicted[0].block.id(), b.id());
        assert_eq!(alloc.evicted[0].to, Tier::HostRam);
        assert_eq!(mgr.get_tier(b.id()), Some(Tier::HostRam));
    }

    #[test]
    fn test_allocate_evicts_by_megabytes() {
        let (_mgr, bal) = setup(&[(0, 10, 8)]);
        bal.allocate_block(block(4), DeviceId(0)).unwrap();
        bal.allocate_block(block(4), DeviceId(0)).unwrap();
        let alloc = bal.allocate_block(block(7), DeviceId(0)).unwrap();
        assert_eq!(alloc.evicted.len(), 2);
        assert_eq!(bal.device_info(DeviceId(0)).unwrap().used_mb, 7);
    }

    #[test]
    fn test_allocate_too_large() {
        let (_mgr, bal) = setup(&[(0, 10, 8)]);
        let err = bal.allocate_block(block(11), DeviceId(0)).unwrap_err();
        assert!(matches!(err, MemoryError::Capacity { .. }));
    }

    #[test]
    fn test_allocate_unknown_device() {
        let (_mgr, bal) = setup(&[(0, 10, 8)]);
        let err = bal.allocate_block(block(1), DeviceId(5)).unwrap_err();
        assert!(matches!(err, MemoryError::UnknownDevice(DeviceId(5))));
    }

    #[test]
    fn test_allocate_duplicate_device() {
        let (_mgr, bal) = setup(&[(0, 100, 8), (1, 100, 8)]);
        let b = block(1);
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        assert!(bal.allocate_block(b.clone(), DeviceId(0)).is_ok());
        let err = bal.allocate_block(b, DeviceId(1)).unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateBlock { .. }));
    }

    #[test]
    fn test_failed_admission_changes_nothing() {
        let mgr = Arc::new(
            HierarchicalMemoryManager::default()
                .with_limit(Tier::HostRam, TierLimit::blocks(0))
                .with_limit(Tier::LocalDisk, TierLimit::blocks(0))
                .with_limit(Tier::Remote, TierLimit::blocks(0)),
        );
        let bal = DeviceBalancer::new(
            Arc::clone(&mgr),
            [DeviceSpec::new(DeviceId(0), Capacity::from_mb(100), 1)],
        );
        let a = block(1);
        bal.allocate_block(a.clone(), DeviceId(0)).unwrap();
        assert!(bal.allocate_block(block(1), DeviceId(0)).is_err());
        assert_eq!(bal.resident_on(DeviceId(0)).len(), 1);
        assert_eq!(mgr.get_tier(a.id()), Some(Tier::GpuPrimary));
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mgr, bal) = setup(&[(0, 100, 4)]);
        let b = block(1);
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        assert!(bal.release_block(b.id(), DeviceId(0)).unwrap().is_some());
        assert!(bal.release_block(b.id(), DeviceId(0)).unwrap().is_none());
        assert!(!mgr.contains(b.id()));
    }

    #[test]
    fn test_migrate_between_devices() {
        let (mgr, bal) = setup(&[(0, 100, 4), (1, 100, 4)]);
        let b = block(8);
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        bal.migrate_block(b.id(), DeviceId(0), DeviceId(1)).unwrap();
        assert_eq!(bal.resident_block(b.id()).unwrap().0, DeviceId(1));
        assert_eq!(mgr.device_of(b.id()), Some(DeviceId(1)));
        assert_eq!(bal.device_info(DeviceId(0)).unwrap().used_mb, 0);
    }

    #[test]
    fn test_migrate_failure_keeps_source() {
        let (_mgr, bal) = setup(&[(0, 100, 4), (1, 4, 4)]);
        let b = block(8);
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        let err = bal.migrate_block(b.id(), DeviceId(0), DeviceId(1)).unwrap_err();
        assert!(matches!(err, MemoryError::Capacity { .. }));
        assert_eq!(bal.resident_block(b.id()).unwrap().0, DeviceId(0));

        let err = bal.migrate_block(BlockId(u64::MAX), DeviceId(0), DeviceId(1)).unwrap_err();
        assert!(matches!(err, MemoryError::NotResident { .. }));
    }

    #[test]
    fn test_evict_to() {
        let (mgr, bal) = setup(&[(0, 100, 4)]);
        let b = block(8);
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        let (evicted, displaced) = bal.evict_to(b.id(), Tier::LocalDisk).unwrap();
        assert_eq!(evicted.to, Tier::LocalDisk);
        assert!(displaced.is_empty());
        assert_eq!(mgr.get_tier(b.id()), Some(Tier::LocalDisk));
        assert!(bal.resident_block(b.id()).is_none());
        assert!(bal.evict_to(b.id(), Tier::HostRam).is_err());
    }

    #[test]
    fn test_balance_evicts_lru_until_under_threshold() {
        let (mgr, bal) = setup(&[(0, 100, 8), (1, 100, 8)]);
        let blocks: Vec<Block> = (0..3).map(|_| block(10)).collect();
        for b in &blocks {
            bal.allocate_block(b.clone(), DeviceId(0)).unwrap();
        }
        for b in blocks.iter().rev() {
            mgr.touch(b.id()).unwrap();
        }

        let usage = BTreeMap::from([
            (DeviceId(0), DeviceUsage::Measured(95.0)),
            (DeviceId(1), DeviceUsage::Unavailable),
        ]);
        let outcome = bal.balance(None, &usage, 80.0);

        // Touched in reverse, so the last block is coldest.
        let ids: Vec<BlockId> = outcome.evicted.iter().map(|e| e.block.id()).collect();
        assert_eq!(ids, vec![blocks[2].id(), blocks[1].id()]);
        assert_eq!(outcome.usage_after[&DeviceId(0)], DeviceUsage::Measured(75.0));
        assert_eq!(outcome.usage_after[&DeviceId(1)], DeviceUsage::Unavailable);
    }

    #[test]
    fn test_balance_respects_eligible() {
        let (_mgr, bal) = setup(&[(0, 100, 8)]);
        let a = block(10);
        let b = block(10);
        bal.allocate_block(a.clone(), DeviceId(0)).unwrap();
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();

        let eligible = HashSet::from([b.id()]);
        let usage = BTreeMap::from([(DeviceId(0), DeviceUsage::Measured(99.0))]);
        let outcome = bal.balance(Some(&eligible), &usage, 50.0);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].block.id(), b.id());
        assert!(bal.resident_block(a.id()).is_some());
    }

    #[test]
    fn test_claimed_resident_is_never_a_victim() {
        let (mgr, bal) = setup(&[(0, 100, 1)]);
        let a = block(1);
        bal.allocate_block(a.clone(), DeviceId(0)).unwrap();

        let held = bal.claims().claim(a.id()).unwrap();
        let err = bal.allocate_block(block(1), DeviceId(0)).unwrap_err();
        assert!(matches!(err, MemoryError::BlockBusy(id) if id == a.id()));
        assert_eq!(mgr.get_tier(a.id()), Some(Tier::GpuPrimary));
        assert_eq!(bal.resident_on(DeviceId(0)).len(), 1);
        drop(held);

        let alloc = bal.allocate_block(block(1), DeviceId(0)).unwrap();
        assert_eq!(alloc.evicted[0].block.id(), a.id());
        assert!(bal.claims().is_claimed(a.id()));
        drop(alloc);
        assert!(bal.claims().is_empty());
    }

    #[test]
    fn test_balance_skips_claimed() {
        let (_mgr, bal) = setup(&[(0, 100, 8)]);
        let a = block(10);
        let b = block(10);
        bal.allocate_block(a.clone(), DeviceId(0)).unwrap();
        bal.allocate_block(b.clone(), DeviceId(0)).unwrap();

        let _held = bal.claims().claim(a.id()).unwrap();
        let usage = BTreeMap::from([(DeviceId(0), DeviceUsage::Measured(99.0))]);
        let outcome = bal.balance(None, &usage, 50.0);
        let ids: Vec<BlockId> = outcome.evicted.iter().map(|e| e.block.id()).collect();
        assert_eq!(ids, vec![b.id()]);
        assert!(bal.resident_block(a.id()).is_some());
    }
}
