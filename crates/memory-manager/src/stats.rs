// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Registry statistics for diagnostics.
//!
//! [`RegistryStats`] counts what the tier registry has done since start-up:
//! registrations, tier moves, displacements, and rejected requests. These
//! numbers are the first thing to look at when tuning tier limits or the
//! hotness policy.

/// Cumulative counters kept by the tier registry.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    /// Blocks newly registered.
    pub registrations: u64,
    /// Blocks removed from the registry.
    pub deregistrations: u64,
    /// Calls to `touch`.
    pub touches: u64,
    /// Successful tier moves (including displacements).
    pub migrations: u64,
    /// Blocks pushed one tier down to make room for a migration.
    pub displacements: u64,
    /// Promotions queued by the hotness policy.
    pub promotions_scheduled: u64,
    /// Demotions triggered by device pressure.
    pub demotions: u64,
    /// Requests refused because a tier was full.
    pub capacity_rejections: u64,
    /// Peak number of registered blocks.
    pub peak_blocks: usize,
}

impl RegistryStats {
    pub(crate) fn record_registration(&mut self, live_blocks: usize) {
        self.registrations += 1;
        if live_blocks > self.peak_blocks {
            self.peak_blocks = live_blocks;
        }
    }

    pub(crate) fn record_migration(&mut self) {
        self.migrations += 1;
    }

    pub(crate) fn record_displacement(&mut self) {
        self.migrations += 1;
        self.displacements += 1;
    }

    pub(crate) fn record_rejection(&mut self) {
        self.capacity_rejections += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Registry: {} registered ({} removed, peak {}), {} moves ({} displaced), \
             {} promotions queued, {} demotions, {} rejections",
            self.registrations,
            self.deregistrations,
            self.peak_blocks,
            self.migrations,
            self.displacements,
            self.promotions_scheduled,
            self.demotions,
            self.capacity_rejections,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracking() {
        let mut s = RegistryStats::default();
        s.record_registration(1);
        s.record_registration(2);
        s.record_registration(1);
        assert_eq!(s.registrations, 3);
        assert_eq!(s.peak_blocks, 2);
    }

    #[test]
    fn test_displacement_counts_as_move() {
        let mut s = RegistryStats::default();
        s.record_migration();
        s.record_displacement();
        assert_eq!(s.migrations, 2);
        assert_eq!(s.displacements, 1);
    }

    #[test]
    fn test_summary() {
        let mut s = RegistryStats::default();
        s.record_registration(1);
        s.record_rejection();
        let summary = s.summary();
        assert!(summary.contains("1 registered"));
        assert!(summary.contains("1 rejections"));
    }
}
