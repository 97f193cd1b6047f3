// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Orchestrator counters.
//!
//! [`OrchestratorMetrics`] is updated lock-free from every operation;
//! [`MetricsSnapshot`] is the serialisable view handed to the serving layer
//! and embedded in the orchestrator summary.

use memory_manager::Tier;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters.
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    placements: AtomicU64,
    migrations: AtomicU64,
    rebalance_cycles: AtomicU64,
    evictions: AtomicU64,
    moves_host_ram: AtomicU64,
    moves_local_disk: AtomicU64,
    moves_remote: AtomicU64,
    remote_failures: AtomicU64,
    fetch_host_ram: AtomicU64,
    fetch_local_disk: AtomicU64,
    fetch_remote: AtomicU64,
    fetch_misses: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_placement(&self) {
        bump(&self.placements);
    }

    pub fn record_migration(&self) {
        bump(&self.migrations);
    }

    pub fn record_rebalance(&self) {
        bump(&self.rebalance_cycles);
    }

    pub fn record_evictions(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Counts a hierarchy-phase move into an off-device tier.
    pub fn record_hierarchy_move(&self, tier: Tier) {
        match tier {
            Tier::HostRam => bump(&self.moves_host_ram),
            Tier::LocalDisk => bump(&self.moves_local_disk),
            Tier::Remote => bump(&self.moves_remote),
            Tier::GpuPrimary | Tier::GpuCache => {}
        }
    }

    pub fn record_remote_failure(&self) {
        bump(&self.remote_failures);
    }

    /// Counts a fetch served from `tier`, or a miss for `None`.
    pub fn record_fetch(&self, tier: Option<Tier>) {
        match tier {
            Some(Tier::HostRam) => bump(&self.fetch_host_ram),
            Some(Tier::LocalDisk) => bump(&self.fetch_local_disk),
            Some(Tier::Remote) => bump(&self.fetch_remote),
            Some(_) => {}
            None => bump(&self.fetch_misses),
        }
    }

    pub fn record_promotion(&self) {
        bump(&self.promotions);
    }

    pub fn record_demotion(&self) {
        bump(&self.demotions);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            placements: get(&self.placements),
            migrations: get(&self.migrations),
            rebalance_cycles: get(&self.rebalance_cycles),
            evictions: get(&self.evictions),
            hierarchy_moves: TierCounts {
                host_ram: get(&self.moves_host_ram),
                local_disk: get(&self.moves_local_disk),
                remote: get(&self.moves_remote),
            },
            remote_failures: get(&self.remote_failures),
            fetch_hits: TierCounts {
                host_ram: get(&self.fetch_host_ram),
                local_disk: get(&self.fetch_local_disk),
                remote: get(&self.fetch_remote),
            },
            fetch_misses: get(&self.fetch_misses),
            promotions: get(&self.promotions),
            demotions: get(&self.demotions),
        }
    }
}

/// Per off-device tier counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TierCounts {
    pub host_ram: u64,
    pub local_disk: u64,
    pub remote: u64,
}

impl TierCounts {
    pub fn total(&self) -> u64 {
        self.host_ram + self.local_disk + self.remote
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub placements: u64,
    pub migrations: u64,
    pub rebalance_cycles: u64,
    pub evictions: u64,
    pub hierarchy_moves: TierCounts,
    pub remote_failures: u64,
    pub fetch_hits: TierCounts,
    pub fetch_misses: u64,
    pub promotions: u64,
    pub demotions: u64,
}

impl MetricsSnapshot {
    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Orchestrator: {} placements, {} migrations, {} rebalance cycles, \
             {} evictions, moves ram/disk/remote {}/{}/{}, \
             fetch hits {} (ram {}, disk {}, remote {}) / {} misses, \
             {} remote failures, {} promotions, {} demotions",
            self.placements,
            self.migrations,
            self.rebalance_cycles,
            self.evictions,
            self.hierarchy_moves.host_ram,
            self.hierarchy_moves.local_disk,
            self.hierarchy_moves.remote,
            self.fetch_hits.total(),
            self.fetch_hits.host_ram,
            self.fetch_hits.local_disk,
            self.fetch_hits.remote,
            self.fetch_misses,
            self.remote_failures,
            self.promotions,
            self.demotions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let s = OrchestratorMetrics::new().snapshot();
        assert_eq!(s, MetricsSnapshot::default());
    }

    #[test]
    fn test_counts_by_tier() {
        let m = OrchestratorMetrics::new();
        m.record_hierarchy_move(Tier::HostRam);
        m.record_hierarchy_move(Tier::Remote);
        m.record_hierarchy_move(Tier::GpuPrimary);
        m.record_fetch(Some(Tier::LocalDisk));
        m.record_fetch(None);
        m.record_evictions(3);

        let s = m.snapshot();
        assert_eq!(s.hierarchy_moves.total(), 2);
        assert_eq!(s.fetch_hits.local_disk, 1);
        assert_eq!(s.fetch_misses, 1);
        assert_eq!(s.evictions, 3);
        assert!(s.summary().contains("3 evictions"));
    }
}
