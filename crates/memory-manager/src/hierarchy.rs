// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The tier registry of record.
//!
//! [`HierarchicalMemoryManager`] knows, for every block, which tier it lives
//! in, how large it is, and how hot it is. Every tier change goes through
//! here, under a single lock, so a block is never absent and never
//! registered in two places.
//!
//! # Hotness
//! Each block carries a hybrid LRU/LFU score:
//!
//! ```text
//! touch:        hotness = hotness * decay + 1
//! decay_sweep:  hotness = hotness * decay
//! ```
//!
//! A block whose hotness exceeds `promote_threshold` is scheduled for
//! promotion one tier up. "Coldest" for eviction purposes is decided by the
//! registry clock: `last_access` is a strictly increasing logical sequence,
//! so two blocks never tie.

use crate::{Block, BlockId, MemoryError, RegistryStats, Tier};
use parking_lot::Mutex;
use resource_monitor::{DeviceId, DeviceUsage};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

// ── Policy and limits ──────────────────────────────────────────────────────

/// Parameters of the hotness score.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HotnessPolicy {
    /// Multiplier applied on every touch and sweep, in `(0, 1]`.
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Hotness above which a block is scheduled for promotion.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: f64,
}

fn default_decay() -> f64 {
    0.9
}
fn default_promote_threshold() -> f64 {
    3.0
}

impl Default for HotnessPolicy {
    fn default() -> Self {
        Self {
            decay: default_decay(),
            promote_threshold: default_promote_threshold(),
        }
    }
}

/// Optional ceilings on one tier. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TierLimit {
    pub max_blocks: Option<usize>,
    pub max_mb: Option<u64>,
}

impl TierLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn blocks(max_blocks: usize) -> Self {
        Self {
            max_blocks: Some(max_blocks),
            max_mb: None,
        }
    }

    pub fn megabytes(max_mb: u64) -> Self {
        Self {
            max_blocks: None,
            max_mb: Some(max_mb),
        }
    }

    /// Returns `true` if one more block of `size_mb` fits on top of `usage`.
    pub fn admits(&self, usage: TierUsage, size_mb: u64) -> bool {
        let blocks_ok = self.max_blocks.map_or(true, |max| usage.blocks < max);
        let mb_ok = self
            .max_mb
            .map_or(true, |max| usage.used_mb.saturating_add(size_mb) <= max);
        blocks_ok && mb_ok
    }

    fn available_mb(&self, usage: TierUsage) -> u64 {
        self.max_mb
            .map_or(u64::MAX, |max| max.saturating_sub(usage.used_mb))
    }
}

/// Current occupancy of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TierUsage {
    pub blocks: usize,
    pub used_mb: u64,
}

impl TierUsage {
    fn add(&mut self, size_mb: u64) {
        self.blocks += 1;
        self.used_mb += size_mb;
    }

    fn sub(&mut self, size_mb: u64) {
        self.blocks = self.blocks.saturating_sub(1);
        self.used_mb = self.used_mb.saturating_sub(size_mb);
    }
}

// ── Records ────────────────────────────────────────────────────────────────

/// Everything the registry knows about one block.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub tier: Tier,
    pub size_mb: u32,
    pub access_count: u64,
    /// Registry clock value of the most recent access.
    pub last_access: u64,
    pub hotness: f64,
    /// Owning device while the block is on a device tier.
    pub device: Option<DeviceId>,
}

impl BlockRecord {
    /// Orders colder records first: lower hotness, then older access.
    fn colder_than(&self, other: &BlockRecord) -> Ordering {
        self.hotness
            .total_cmp(&other.hotness)
            .then(self.last_access.cmp(&other.last_access))
    }
}

/// One committed tier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TierMove {
    pub block: BlockId,
    pub from: Tier,
    pub to: Tier,
}

/// Outcome of admitting a block onto a device tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    /// Tier the block was in before, if it was already registered.
    pub previous: Option<Tier>,
    /// Blocks pushed off-device to make room, in eviction order.
    pub spilled: Vec<TierMove>,
}

#[derive(Debug, Default)]
struct Registry {
    records: HashMap<BlockId, BlockRecord>,
    usage: BTreeMap<Tier, TierUsage>,
    clock: u64,
    scheduled: VecDeque<(BlockId, Tier)>,
    stats: RegistryStats,
}

impl Registry {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn usage(&self, tier: Tier) -> TierUsage {
        self.usage.get(&tier).copied().unwrap_or_default()
    }

    /// Moves a record between tiers and keeps occupancy in step.
    fn relocate(&mut self, id: BlockId, to: Tier) -> Option<TierMove> {
        let record = self.records.get_mut(&id)?;
        let from = record.tier;
        let size = u64::from(record.size_mb);
        record.tier = to;
        if !to.is_device() {
            record.device = None;
        }
        self.usage.entry(from).or_default().sub(size);
        self.usage.entry(to).or_default().add(size);
        Some(TierMove { block: id, from, to })
    }
}

// ── Manager ────────────────────────────────────────────────────────────────

/// The tier registry: sole owner of block residency truth.
#[derive(Debug)]
pub struct HierarchicalMemoryManager {
    policy: HotnessPolicy,
    limits: BTreeMap<Tier, TierLimit>,
    inner: Mutex<Registry>,
}

impl Default for HierarchicalMemoryManager {
    fn default() -> Self {
        Self::new(HotnessPolicy::default())
    }
}

impl HierarchicalMemoryManager {
    /// Creates an empty registry with unbounded tiers.
    pub fn new(policy: HotnessPolicy) -> Self {
        Self {
            policy,
            limits: BTreeMap::new(),
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Sets the limit for `tier`.
    pub fn with_limit(mut self, tier: Tier, limit: TierLimit) -> Self {
        self.limits.insert(tier, limit);
        self
    }

    pub fn policy(&self) -> HotnessPolicy {
        self.policy
    }

    pub fn limit(&self, tier: Tier) -> TierLimit {
        self.limits.get(&tier).copied().unwrap_or_default()
    }

    fn room_in(&self, reg: &Registry, tier: Tier, size_mb: u64) -> bool {
        self.limit(tier).admits(reg.usage(tier), size_mb)
    }

    fn capacity_error(&self, reg: &Registry, tier: Tier, size_mb: u64) -> MemoryError {
        MemoryError::Capacity {
            location: tier.to_string(),
            requested_mb: size_mb,
            available_mb: self.limit(tier).available_mb(reg.usage(tier)),
        }
    }

    /// Registers `block` in `tier`.
    ///
    /// Registering the same block in the same tier again is a no-op.
    ///
    /// # Errors
    /// - [`MemoryError::DuplicateBlock`] if the block lives in another tier.
    /// - [`MemoryError::Capacity`] if the tier limit is already reached.
    pub fn register(&self, block: &Block, tier: Tier) -> Result<(), MemoryError> {
        let mut reg = self.inner.lock();
        let size = u64::from(block.size_mb());

        if let Some(existing) = reg.records.get(&block.id()) {
            if existing.tier == tier {
                return Ok(());
            }
            return Err(MemoryError::DuplicateBlock {
                block: block.id(),
                existing: existing.tier,
            });
        }

        if !self.room_in(&reg, tier, size) {
            reg.stats.record_rejection();
            return Err(self.capacity_error(&reg, tier, size));
        }

        let now = reg.tick();
        reg.records.insert(
            block.id(),
            BlockRecord {
                id: block.id(),
                tier,
                size_mb: block.size_mb(),
                access_count: 0,
                last_access: now,
                hotness: 0.0,
                device: None,
            },
        );
        reg.usage.entry(tier).or_default().add(size);
        let live = reg.records.len();
        reg.stats.record_registration(live);

        tracing::debug!("registered {} ({} MB) in {tier}", block.id(), block.size_mb());
        Ok(())
    }

    /// Admits `block` to [`Tier::GpuPrimary`] on `device`, spilling `victims`
    /// off-device in the same transaction.
    ///
    /// Each victim goes to the first of host RAM, local disk, remote with
    /// room. Either everything happens or nothing does.
    pub fn admit_with_evictions(
        &self,
        block: &Block,
        device: DeviceId,
        victims: &[BlockId],
    ) -> Result<Admission, MemoryError> {
        let mut guard = self.inner.lock();
        let reg = &mut *guard;
        let size = u64::from(block.size_mb());

        let mut planned = reg.usage.clone();
        let spills = self.plan_spills(reg, &mut planned, victims)?;

        let previous = reg.records.get(&block.id()).map(|r| r.tier);
        if previous != Some(Tier::GpuPrimary) {
            if let Some(prev) = previous {
                planned.entry(prev).or_default().sub(size);
            }
            let usage = planned.get(&Tier::GpuPrimary).copied().unwrap_or_default();
            if !self.limit(Tier::GpuPrimary).admits(usage, size) {
                reg.stats.record_rejection();
                return Err(self.capacity_error(reg, Tier::GpuPrimary, size));
            }
        }

        let spilled = self.commit_spills(reg, spills);

        let now = reg.tick();
        match previous {
            Some(_) => {
                if let Some(mv) = reg.relocate(block.id(), Tier::GpuPrimary) {
                    if mv.from != mv.to {
                        reg.stats.record_migration();
                    }
                }
                if let Some(record) = reg.records.get_mut(&block.id()) {
                    record.device = Some(device);
                    record.last_access = now;
                }
            }
            None => {
                reg.records.insert(
                    block.id(),
                    BlockRecord {
                        id: block.id(),
                        tier: Tier::GpuPrimary,
                        size_mb: block.size_mb(),
                        access_count: 0,
                        last_access: now,
                        hotness: 0.0,
                        device: Some(device),
                    },
                );
                reg.usage.entry(Tier::GpuPrimary).or_default().add(size);
                let live = reg.records.len();
                reg.stats.record_registration(live);
            }
        }

        tracing::debug!(
            "admitted {} to {device} (previously {:?}, {} spilled)",
            block.id(),
            previous,
            spilled.len()
        );
        Ok(Admission { previous, spilled })
    }

    /// Moves device-resident blocks off-device in one transaction.
    ///
    /// Blocks already off-device are left alone.
    pub fn spill_many(&self, ids: &[BlockId]) -> Result<Vec<TierMove>, MemoryError> {
        let mut guard = self.inner.lock();
        let reg = &mut *guard;
        let mut planned = reg.usage.clone();
        let spills = self.plan_spills(reg, &mut planned, ids)?;
        Ok(self.commit_spills(reg, spills))
    }

    /// Moves one block off-device to the first tier with room.
    pub fn spill(&self, id: BlockId) -> Result<Option<TierMove>, MemoryError> {
        Ok(self.spill_many(&[id])?.into_iter().next())
    }

    fn plan_spills(
        &self,
        reg: &mut Registry,
        planned: &mut BTreeMap<Tier, TierUsage>,
        ids: &[BlockId],
    ) -> Result<Vec<(BlockId, Tier)>, MemoryError> {
        let mut plan = Vec::with_capacity(ids.len());
        for &id in ids {
            let record = reg.records.get(&id).ok_or(MemoryError::UnknownBlock(id))?;
            if !record.tier.is_device() {
                continue;
            }
            let size = u64::from(record.size_mb);
            let target = Tier::OFF_DEVICE.into_iter().find(|t| {
                let usage = planned.get(t).copied().unwrap_or_default();
                self.limit(*t).admits(usage, size)
            });
            let Some(target) = target else {
                reg.stats.record_rejection();
                return Err(MemoryError::Capacity {
                    location: "off-device tiers".to_string(),
                    requested_mb: size,
                    available_mb: 0,
                });
            };
            planned.entry(record.tier).or_default().sub(size);
            planned.entry(target).or_default().add(size);
            plan.push((id, target));
        }
        Ok(plan)
    }

    fn commit_spills(&self, reg: &mut Registry, plan: Vec<(BlockId, Tier)>) -> Vec<TierMove> {
        plan.into_iter()
            .filter_map(|(id, target)| {
                let mv = reg.relocate(id, target)?;
                reg.stats.record_migration();
                tracing::debug!("spilled {id} {} -> {}", mv.from, mv.to);
                Some(mv)
            })
            .collect()
    }

    /// Records an access: bumps the count, refreshes the clock, heats up.
    pub fn touch(&self, id: BlockId) -> Result<(), MemoryError> {
        let mut guard = self.inner.lock();
        let reg = &mut *guard;
        if !reg.records.contains_key(&id) {
            return Err(MemoryError::UnknownBlock(id));
        }
        let now = reg.tick();
        if let Some(record) = reg.records.get_mut(&id) {
            record.access_count += 1;
            record.last_access = now;
            record.hotness = record.hotness * self.policy.decay + 1.0;
        }
        reg.stats.touches += 1;
        Ok(())
    }

    /// Multiplies every block's hotness by the decay factor.
    pub fn decay_sweep(&self) {
        let mut reg = self.inner.lock();
        for record in reg.records.values_mut() {
            record.hotness *= self.policy.decay;
        }
    }

    /// Schedules a promotion if the block is hot enough and the next faster
    /// tier has room. Returns the scheduled target.
    pub fn promote_policy(&self, id: BlockId) -> Result<Option<Tier>, MemoryError> {
        let mut guard = self.inner.lock();
        let reg = &mut *guard;
        let record = reg.records.get(&id).ok_or(MemoryError::UnknownBlock(id))?;

        if record.hotness <= self.policy.promote_threshold {
            return Ok(None);
        }
        let Some(target) = record.tier.promote() else {
            return Ok(None);
        };
        if let Some((_, queued)) = reg.scheduled.iter().find(|(b, _)| *b == id) {
            return Ok(Some(*queued));
        }
        if !self.room_in(reg, target, u64::from(record.size_mb)) {
            tracing::debug!("{id} is hot but {target} is full");
            return Ok(None);
        }

        reg.scheduled.push_back((id, target));
        reg.stats.promotions_scheduled += 1;
        tracing::debug!("scheduled promotion of {id} to {target}");
        Ok(Some(target))
    }

    /// Drains the promotion queue in scheduling order.
    pub fn take_scheduled_promotions(&self) -> Vec<(BlockId, Tier)> {
        self.inner.lock().scheduled.drain(..).collect()
    }

    /// Demotes the block one tier if its device is above `over_pct`.
    ///
    /// An unavailable reading never triggers a demotion.
    pub fn demote_if_needed(
        &self,
        id: BlockId,
        device_usage: DeviceUsage,
        over_pct: f64,
    ) -> Result<Option<TierMove>, MemoryError> {
        let mut guard = self.inner.lock();
        let reg = &mut *guard;
        let record = reg.records.get(&id).ok_or(MemoryError::UnknownBlock(id))?;

        if !device_usage.exceeds(over_pct) {
            return Ok(None);
        }
        let Some(target) = record.tier.demote() else {
            return Ok(None);
        };

        let moves = self.migrate_locked(reg, id, target)?;
        reg.stats.demotions += 1;
        Ok(moves.into_iter().find(|m| m.block == id))
    }

    /// Moves a block to `target` atomically.
    ///
    /// If `target` is full, the coldest block there that is colder than the
    /// incoming one is pushed one tier further down to make room. Returns
    /// every committed move, displaced block first.
    pub fn migrate(&self, id: BlockId, target: Tier) -> Result<Vec<TierMove>, MemoryError> {
        let mut guard = self.inner.lock();
        self.migrate_locked(&mut guard, id, target)
    }

    fn migrate_locked(
        &self,
        reg: &mut Registry,
        id: BlockId,
        target: Tier,
    ) -> Result<Vec<TierMove>, MemoryError> {
        let incoming = reg
            .records
            .get(&id)
            .cloned()
            .ok_or(MemoryError::UnknownBlock(id))?;
        if incoming.tier == target {
            return Ok(Vec::new());
        }
        let size = u64::from(incoming.size_mb);

        if self.room_in(reg, target, size) {
            let mv = reg.relocate(id, target);
            reg.stats.record_migration();
            tracing::debug!("migrated {id} {} -> {target}", incoming.tier);
            return Ok(mv.into_iter().collect());
        }

        let refuse = |reg: &mut Registry, reason: &str| {
            reg.stats.record_rejection();
            MemoryError::Migration {
                block: id,
                target,
                reason: reason.to_string(),
            }
        };

        let Some(down) = target.demote() else {
            return Err(refuse(reg, "tier is full and nothing lies below it"));
        };

        let victim = reg
            .records
            .values()
            .filter(|r| r.tier == target && r.id != id)
            .filter(|r| r.colder_than(&incoming) == Ordering::Less)
            .min_by(|a, b| a.colder_than(b))
            .cloned();
        let Some(victim) = victim else {
            return Err(refuse(reg, "tier is full and no resident is colder"));
        };

        let mut planned = reg.usage.clone();
        planned.entry(incoming.tier).or_default().sub(size);
        planned.entry(target).or_default().sub(u64::from(victim.size_mb));
        let down_usage = planned.get(&down).copied().unwrap_or_default();
        if !self.limit(down).admits(down_usage, u64::from(victim.size_mb)) {
            return Err(refuse(reg, "no room one tier down for the displaced block"));
        }
        planned.entry(down).or_default().add(u64::from(victim.size_mb));
        let target_usage = planned.get(&target).copied().unwrap_or_default();
        if !self.limit(target).admits(target_usage, size) {
            return Err(refuse(reg, "displacing the coldest block frees too little"));
        }

        let mut moves = Vec::with_capacity(2);
        if let Some(mv) = reg.relocate(victim.id, down) {
            reg.stats.record_displacement();
            moves.push(mv);
        }
        if let Some(mv) = reg.relocate(id, target) {
            reg.stats.record_migration();
            moves.push(mv);
        }
        tracing::debug!(
            "migrated {id} {} -> {target}, displaced {} to {down}",
            incoming.tier,
            victim.id
        );
        Ok(moves)
    }

    /// Removes a block from the registry, returning its last record.
    pub fn deregister(&self, id: BlockId) -> Option<BlockRecord> {
        let mut reg = self.inner.lock();
        let record = reg.records.remove(&id)?;
        reg.usage
            .entry(record.tier)
            .or_default()
            .sub(u64::from(record.size_mb));
        reg.scheduled.retain(|(b, _)| *b != id);
        reg.stats.deregistrations += 1;
        tracing::debug!("deregistered {id} from {}", record.tier);
        Some(record)
    }

    /// Sets or clears the owning device of a block.
    pub fn set_device(&self, id: BlockId, device: Option<DeviceId>) -> Result<(), MemoryError> {
        let mut reg = self.inner.lock();
        let record = reg
            .records
            .get_mut(&id)
            .ok_or(MemoryError::UnknownBlock(id))?;
        record.device = device;
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn record(&self, id: BlockId) -> Option<BlockRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    pub fn get_tier(&self, id: BlockId) -> Option<Tier> {
        self.inner.lock().records.get(&id).map(|r| r.tier)
    }

    pub fn last_access(&self, id: BlockId) -> Option<u64> {
        self.inner.lock().records.get(&id).map(|r| r.last_access)
    }

    pub fn device_of(&self, id: BlockId) -> Option<DeviceId> {
        self.inner.lock().records.get(&id).and_then(|r| r.device)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.inner.lock().records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a block of `size_mb` would fit in `tier` right now.
    pub fn fits(&self, tier: Tier, size_mb: u32) -> bool {
        let reg = self.inner.lock();
        self.room_in(&reg, tier, u64::from(size_mb))
    }

    pub fn usage(&self, tier: Tier) -> TierUsage {
        self.inner.lock().usage(tier)
    }

    /// Blocks in `tier`, coldest (least recently accessed) first.
    pub fn blocks_in(&self, tier: Tier) -> Vec<BlockId> {
        let reg = self.inner.lock();
        let mut records: Vec<&BlockRecord> =
            reg.records.values().filter(|r| r.tier == tier).collect();
        records.sort_by_key(|r| r.last_access);
        records.into_iter().map(|r| r.id).collect()
    }

    /// Orders `ids` least recently accessed first. Unknown ids are dropped.
    pub fn coldest_first(&self, ids: impl IntoIterator<Item = BlockId>) -> Vec<BlockId> {
        let reg = self.inner.lock();
        let mut known: Vec<(u64, BlockId)> = ids
            .into_iter()
            .filter_map(|id| reg.records.get(&id).map(|r| (r.last_access, id)))
            .collect();
        known.sort();
        known.into_iter().map(|(_, id)| id).collect()
    }

    /// Block count per tier, every tier present.
    pub fn summary(&self) -> BTreeMap<Tier, usize> {
        let reg = self.inner.lock();
        Tier::ALL
            .into_iter()
            .map(|t| (t, reg.usage(t).blocks))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().stats.clone()
    }
}
