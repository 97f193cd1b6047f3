// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # resource-monitor
//!
//! Reports per-device utilisation (0–100 %) for every accelerator the
//! orchestrator may place blocks on.
//!
//! # Monitors
//! - [`PushMonitor`]: readings are pushed in by an external collaborator
//!   (the serving layer, a driver sidecar, or a test). This is the default
//!   source for the orchestrator.
//! - [`DrmMonitor`]: reads VRAM usage for every card exposed under
//!   `/sys/class/drm/` (amdgpu `mem_info_vram_used` / `mem_info_vram_total`).
//!
//! # No fabricated numbers
//! A device that cannot be read reports [`DeviceUsage::Unavailable`] instead
//! of a synthetic percentage, so placement code can tell "no data" apart
//! from "measured 0 %".
//!
//! # Example
//! ```
//! use resource_monitor::{DeviceId, DeviceMonitor, DeviceUsage, PushMonitor};
//!
//! let monitor = PushMonitor::new();
//! monitor.set(DeviceId(0), 42.0);
//! monitor.mark_unavailable(DeviceId(1));
//!
//! let status = monitor.status();
//! assert_eq!(status[&DeviceId(0)], DeviceUsage::Measured(42.0));
//! assert_eq!(status[&DeviceId(1)], DeviceUsage::Unavailable);
//! ```

mod device;
mod drm;
mod error;
mod push;
mod snapshot;

pub use device::{DeviceId, DeviceUsage};
pub use drm::DrmMonitor;
pub use error::MonitorError;
pub use push::PushMonitor;
pub use snapshot::DeviceSnapshot;

use std::collections::BTreeMap;

/// A source of per-device utilisation readings.
///
/// Implementations must be cheap to call: the orchestrator queries the
/// monitor on every placement and at the start of each rebalance phase.
pub trait DeviceMonitor: Send + Sync {
    /// Human-readable name of this monitor (for logs).
    fn name(&self) -> &str;

    /// Returns the current utilisation of every known device.
    fn status(&self) -> BTreeMap<DeviceId, DeviceUsage>;

    /// Returns the utilisation of a single device.
    fn usage(&self, device: DeviceId) -> DeviceUsage {
        self.status()
            .get(&device)
            .copied()
            .unwrap_or(DeviceUsage::Unavailable)
    }
}

/// Captures a point-in-time snapshot from any monitor.
pub fn snapshot(monitor: &dyn DeviceMonitor) -> DeviceSnapshot {
    DeviceSnapshot::capture(monitor)
}
