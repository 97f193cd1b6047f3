// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-orch status`: per-device utilisation from the DRM sysfs monitor.
//!
//! Devices the driver exposes without a busy counter are listed as `n/a`
//! rather than guessed.

use resource_monitor::{DeviceUsage, DrmMonitor};
use std::path::PathBuf;

pub async fn execute(drm_root: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let monitor = match drm_root {
        Some(root) => DrmMonitor::with_root(root),
        None => DrmMonitor::new(),
    };
    let snapshot = resource_monitor::snapshot(&monitor);

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             vram-orch · Device Status               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    if snapshot.devices.is_empty() {
        println!("  No DRM devices found.");
        return Ok(());
    }

    for (id, usage) in &snapshot.devices {
        match usage {
            DeviceUsage::Measured(pct) => {
                println!("   {id:<6} {pct:>5.1}%  {}", usage_bar(*pct / 100.0));
            }
            DeviceUsage::Unavailable => println!("   {id:<6}   n/a   (no busy counter)"),
        }
    }
    println!();

    if let Some(best) = snapshot.least_loaded() {
        println!("  Least loaded: {best}");
    }
    let hot = snapshot.over_threshold(90.0);
    if !hot.is_empty() {
        let names: Vec<String> = hot.iter().map(ToString::to_string).collect();
        println!("  WARNING: above 90%: {}", names.join(", "));
    }
    Ok(())
}

fn usage_bar(fraction: f64) -> String {
    let width = 20;
    let filled = (fraction.clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}
