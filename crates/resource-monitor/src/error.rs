// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device monitoring.

/// Errors that can occur when reading device state.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Failed to read a sysfs file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a numeric value from a sysfs file.
    #[error("failed to parse value from {path}: {detail}")]
    ParseError { path: String, detail: String },

    /// The expected sysfs path does not exist (no driver, container, ...).
    #[error("sysfs path not found: {path}")]
    NotAvailable { path: String },
}
