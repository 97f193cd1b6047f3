// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Admission settings.
//!
//! # TOML Format
//! ```toml
//! [batch]
//! window_ms = 50
//! max_batch = 8
//! timeout_s = 120.0
//!
//! [breaker]
//! failure_threshold = 5
//! recovery_timeout_s = 30.0
//! success_threshold = 2
//! ```

use std::time::Duration;

/// Batching window and limits.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatcherConfig {
    /// How long to collect requests after the first one arrives.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Maximum requests per batch.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Per-request timeout seen by the caller.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
}

fn default_window_ms() -> u64 {
    50
}
fn default_max_batch() -> usize {
    8
}
fn default_timeout_s() -> f64 {
    120.0
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_batch: default_max_batch(),
            timeout_s: default_timeout_s(),
        }
    }
}

impl BatcherConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_s).unwrap_or(Duration::MAX)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds after the last failure before a probe is allowed.
    #[serde(default = "default_recovery_timeout_s")]
    pub recovery_timeout_s: f64,
    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_s() -> f64 {
    30.0
}
fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_s: default_recovery_timeout_s(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.recovery_timeout_s).unwrap_or(Duration::MAX)
    }
}

/// Both halves of the admission layer.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub batch: BatcherConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl AdmissionConfig {
    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch.max_batch == 0 {
            return Err("batch.max_batch must be at least 1".to_string());
        }
        if !(self.batch.timeout_s > 0.0) {
            return Err("batch.timeout_s must be positive".to_string());
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err("breaker thresholds must be at least 1".to_string());
        }
        if !(self.breaker.recovery_timeout_s >= 0.0) {
            return Err("breaker.recovery_timeout_s must not be negative".to_string());
        }
        Ok(())
    }
}
