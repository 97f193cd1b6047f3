// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device identifiers and utilisation readings.

use std::fmt;

/// Identifier of one compute device (GPU or accelerator).
///
/// Ordering follows the numeric id; placement ties are broken in this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

/// A single utilisation reading for one device.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "pct")]
pub enum DeviceUsage {
    /// Measured utilisation in percent, clamped to `[0.0, 100.0]`.
    Measured(f64),
    /// No reading could be taken (driver missing, sysfs absent, ...).
    Unavailable,
}

impl DeviceUsage {
    /// Builds a measured reading, clamping to `[0.0, 100.0]`.
    ///
    /// Non-finite inputs become [`DeviceUsage::Unavailable`].
    pub fn measured(pct: f64) -> Self {
        if pct.is_finite() {
            Self::Measured(pct.clamp(0.0, 100.0))
        } else {
            Self::Unavailable
        }
    }

    /// Returns the measured percentage, if any.
    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Measured(p) => Some(*p),
            Self::Unavailable => None,
        }
    }

    /// Returns `true` if this is a measured value strictly above `threshold_pct`.
    ///
    /// Unavailable readings never count as over threshold.
    pub fn exceeds(&self, threshold_pct: f64) -> bool {
        matches!(self, Self::Measured(p) if *p > threshold_pct)
    }
}

impl fmt::Display for DeviceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measured(p) => write!(f, "{p:.1}%"),
            Self::Unavailable => write!(f, "n/a"),
        }
    }
}
