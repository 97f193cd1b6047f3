// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batcher counters.

use std::time::Duration;

/// Snapshot of batcher activity.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BatcherStats {
    /// Requests queued but not yet taken by a batch.
    pub pending_requests: usize,
    pub total_batches: u64,
    pub total_requests: u64,
    /// Mean wall time of one batch cycle, seconds.
    pub avg_batch_latency_s: f64,
}

impl BatcherStats {
    /// Average requests per batch.
    pub fn avg_batch_size(&self) -> f64 {
        if self.total_batches == 0 {
            return 0.0;
        }
        self.total_requests as f64 / self.total_batches as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "Batcher: {} requests in {} batches (avg {:.1}/batch, {:.1}ms/batch), {} pending",
            self.total_requests,
            self.total_batches,
            self.avg_batch_size(),
            self.avg_batch_latency_s * 1000.0,
            self.pending_requests,
        )
    }
}

/// Running totals kept under the batcher's counter lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub total_batches: u64,
    pub total_requests: u64,
    pub total_latency: Duration,
}

impl Counters {
    pub fn record_batch(&mut self, requests: usize, elapsed: Duration) {
        self.total_batches += 1;
        self.total_requests += requests as u64;
        self.total_latency += elapsed;
    }

    pub fn snapshot(&self, pending_requests: usize) -> BatcherStats {
        let avg = if self.total_batches == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() / self.total_batches as f64
        };
        BatcherStats {
            pending_requests,
            total_batches: self.total_batches,
            total_requests: self.total_requests,
            avg_batch_latency_s: avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let mut c = Counters::default();
        c.record_batch(2, Duration::from_millis(10));
        c.record_batch(1, Duration::from_millis(30));
        let s = c.snapshot(4);
        assert_eq!(s.total_batches, 2);
        assert_eq!(s.total_requests, 3);
        assert!((s.avg_batch_latency_s - 0.02).abs() < 1e-9);
        assert!((s.avg_batch_size() - 1.5).abs() < 1e-9);
        assert!(s.summary().contains("4 pending"));
    }

    #[test]
    fn test_empty_stats() {
        let s = Counters::default().snapshot(0);
        assert_eq!(s.avg_batch_latency_s, 0.0);
        assert_eq!(s.avg_batch_size(), 0.0);
    }
}
