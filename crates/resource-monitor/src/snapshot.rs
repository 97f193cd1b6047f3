// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Aggregated point-in-time device snapshot.

use crate::{DeviceId, DeviceMonitor, DeviceUsage};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// All device readings taken at one instant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSnapshot {
    /// Name of the monitor that produced the readings.
    pub source: String,
    /// Per-device readings.
    pub devices: BTreeMap<DeviceId, DeviceUsage>,
    /// Unix timestamp in milliseconds when the snapshot was taken.
    pub timestamp_ms: u64,
}

impl DeviceSnapshot {
    /// Captures a snapshot from `monitor`.
    pub fn capture(monitor: &dyn DeviceMonitor) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            source: monitor.name().to_string(),
            devices: monitor.status(),
            timestamp_ms,
        }
    }

    /// Returns the devices whose measured usage exceeds `threshold_pct`.
    pub fn over_threshold(&self, threshold_pct: f64) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|(_, u)| u.exceeds(threshold_pct))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns the least-loaded measured device, ties broken by id.
    pub fn least_loaded(&self) -> Option<DeviceId> {
        self.devices
            .iter()
            .filter_map(|(id, u)| u.percent().map(|p| (*id, p)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    /// Returns a one-line summary suitable for logging.
    ///
    /// # Example output
    /// ```text
    /// Devices (push): gpu0 42.0%, gpu1 n/a
    /// ```
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .devices
            .iter()
            .map(|(id, u)| format!("{id} {u}"))
            .collect();
        format!("Devices ({}): {}", self.source, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PushMonitor;

    #[test]
    fn test_capture_and_summary() {
        let m = PushMonitor::new();
        m.set(DeviceId(0), 42.0);
        m.mark_unavailable(DeviceId(1));

        let snap = DeviceSnapshot::capture(&m);
        assert!(snap.timestamp_ms > 0);
        assert_eq!(snap.summary(), "Devices (push): gpu0 42.0%, gpu1 n/a");
    }

    #[test]
    fn test_over_threshold() {
        let m = PushMonitor::new();
        m.set(DeviceId(0), 95.0);
        m.set(DeviceId(1), 50.0);
        m.mark_unavailable(DeviceId(2));

        let snap = DeviceSnapshot::capture(&m);
        assert_eq!(snap.over_threshold(90.0), vec![DeviceId(0)]);
    }

    #[test]
    fn test_least_loaded_tie_breaks_by_id() {
        let m = PushMonitor::new();
        m.set(DeviceId(2), 10.0);
        m.set(DeviceId(1), 10.0);
        m.set(DeviceId(0), 30.0);

        let snap = DeviceSnapshot::capture(&m);
        assert_eq!(snap.least_loaded(), Some(DeviceId(1)));
    }
}
