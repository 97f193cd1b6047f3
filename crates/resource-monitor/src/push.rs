// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A monitor whose readings are pushed in from outside.

use crate::{DeviceId, DeviceMonitor, DeviceUsage};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Device readings supplied by an external collaborator.
///
/// The serving layer (or a driver sidecar) calls [`PushMonitor::set`] as
/// fresh numbers arrive; the orchestrator only ever reads. Devices that were
/// registered but never reported stay [`DeviceUsage::Unavailable`].
#[derive(Debug, Default)]
pub struct PushMonitor {
    readings: RwLock<BTreeMap<DeviceId, DeviceUsage>>,
}

impl PushMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a monitor that knows `devices` but has no readings yet.
    pub fn with_devices(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        let readings = devices
            .into_iter()
            .map(|d| (d, DeviceUsage::Unavailable))
            .collect();
        Self {
            readings: RwLock::new(readings),
        }
    }

    /// Records a measured utilisation for `device`.
    pub fn set(&self, device: DeviceId, pct: f64) {
        self.readings.write().insert(device, DeviceUsage::measured(pct));
    }

    /// Marks `device` as unreadable.
    pub fn mark_unavailable(&self, device: DeviceId) {
        self.readings.write().insert(device, DeviceUsage::Unavailable);
    }

    /// Replaces every reading at once.
    pub fn replace(&self, readings: BTreeMap<DeviceId, DeviceUsage>) {
        *self.readings.write() = readings;
    }

    /// Removes `device` from the monitor entirely.
    pub fn forget(&self, device: DeviceId) {
        self.readings.write().remove(&device);
    }
}

impl DeviceMonitor for PushMonitor {
    fn name(&self) -> &str {
        "push"
    }

    fn status(&self) -> BTreeMap<DeviceId, DeviceUsage> {
        self.readings.read().clone()
    }

    fn usage(&self, device: DeviceId) -> DeviceUsage {
        self.readings
            .read()
            .get(&device)
            .copied()
            .unwrap_or(DeviceUsage::Unavailable)
    }
}
