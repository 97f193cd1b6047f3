// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! VRAM utilisation via `/sys/class/drm/`.
//!
//! The amdgpu driver exposes, for every card:
//! - `/sys/class/drm/cardN/device/mem_info_vram_used`: bytes in use.
//! - `/sys/class/drm/cardN/device/mem_info_vram_total`: total bytes.
//!
//! Connector entries such as `card0-DP-1` are skipped. Cards whose files are
//! missing or unreadable report [`DeviceUsage::Unavailable`].

use crate::{DeviceId, DeviceMonitor, DeviceUsage, MonitorError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default sysfs root for DRM devices.
const DRM_ROOT: &str = "/sys/class/drm";

const VRAM_USED: &str = "device/mem_info_vram_used";
const VRAM_TOTAL: &str = "device/mem_info_vram_total";

/// Reads VRAM utilisation from the kernel DRM sysfs tree.
#[derive(Debug, Clone)]
pub struct DrmMonitor {
    root: PathBuf,
}

impl Default for DrmMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DrmMonitor {
    /// Creates a monitor rooted at `/sys/class/drm`.
    pub fn new() -> Self {
        Self::with_root(DRM_ROOT)
    }

    /// Creates a monitor rooted at an arbitrary directory (for testing).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists `(DeviceId, card directory)` for every `cardN` entry.
    fn cards(&self) -> Vec<(DeviceId, PathBuf)> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("drm root '{}' unreadable: {e}", self.root.display());
                return Vec::new();
            }
        };

        let mut cards: Vec<(DeviceId, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name.to_str()?.strip_prefix("card")?.parse::<u32>().ok()?;
                Some((DeviceId(index), entry.path()))
            })
            .collect();
        cards.sort_by_key(|(id, _)| *id);
        cards
    }

    /// Reads the utilisation of a single card directory.
    pub(crate) fn read_card(card_dir: &Path) -> Result<f64, MonitorError> {
        let used = read_u64(&card_dir.join(VRAM_USED))?;
        let total = read_u64(&card_dir.join(VRAM_TOTAL))?;
        if total == 0 {
            return Err(MonitorError::ParseError {
                path: card_dir.join(VRAM_TOTAL).display().to_string(),
                detail: "total VRAM is zero".to_string(),
            });
        }
        Ok(used as f64 / total as f64 * 100.0)
    }
}

impl DeviceMonitor for DrmMonitor {
    fn name(&self) -> &str {
        "drm-sysfs"
    }

    fn status(&self) -> BTreeMap<DeviceId, DeviceUsage> {
        self.cards()
            .into_iter()
            .map(|(id, dir)| {
                let usage = match Self::read_card(&dir) {
                    Ok(pct) => DeviceUsage::measured(pct),
                    Err(e) => {
                        tracing::debug!("{id}: {e}");
                        DeviceUsage::Unavailable
                    }
                };
                (id, usage)
            })
            .collect()
    }
}

/// Reads a sysfs file and returns its trimmed content.
pub(crate) fn read_sysfs_file(path: &Path) -> Result<String, MonitorError> {
    if !path.exists() {
        return Err(MonitorError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| MonitorError::ReadError {
            path: path.display().to_string(),
            source: e,
        })
}

fn read_u64(path: &Path) -> Result<u64, MonitorError> {
    let content = read_sysfs_file(path)?;
    content.parse::<u64>().map_err(|_| MonitorError::ParseError {
        path: path.display().to_string(),
        detail: format!("expected integer byte count, got '{content}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_card(root: &Path, name: &str, used: &str, total: &str) {
        let dev = root.join(name).join("device");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(dev.join("mem_info_vram_used"), used).unwrap();
        std::fs::write(dev.join("mem_info_vram_total"), total).unwrap();
    }

    #[test]
    fn test_reads_cards() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "512\n", "1024\n");
        fake_card(dir.path(), "card1", "1024", "1024");

        let status = DrmMonitor::with_root(dir.path()).status();
        assert_eq!(status[&DeviceId(0)], DeviceUsage::Measured(50.0));
        assert_eq!(status[&DeviceId(1)], DeviceUsage::Measured(100.0));
    }

    #[test]
    fn test_skips_connectors() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "0", "1024");
        std::fs::create_dir_all(dir.path().join("card0-DP-1")).unwrap();
        std::fs::create_dir_all(dir.path().join("renderD128")).unwrap();

        let status = DrmMonitor::with_root(dir.path()).status();
        assert_eq!(status.len(), 1);
    }

    #[test]
    fn test_unreadable_card_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("card2")).unwrap();
        fake_card(dir.path(), "card3", "garbage", "1024");

        let status = DrmMonitor::with_root(dir.path()).status();
        assert_eq!(status[&DeviceId(2)], DeviceUsage::Unavailable);
        assert_eq!(status[&DeviceId(3)], DeviceUsage::Unavailable);
    }

    #[test]
    fn test_missing_root() {
        let m = DrmMonitor::with_root("/nonexistent/drm");
        assert!(m.status().is_empty());
    }

    #[test]
    fn test_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "0", "0");
        let result = DrmMonitor::read_card(&dir.path().join("card0"));
        assert!(matches!(result, Err(MonitorError::ParseError { .. })));
    }
}
