// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the orchestrator.

/// Errors surfaced by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A registry or device-cache operation failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// A remote transfer failed.
    #[error("transport error: {0}")]
    TransportError(#[from] block_transport::TransportError),

    /// An admission-layer request failed.
    #[error("admission error: {0}")]
    AdmissionError(#[from] admission::AdmissionError),

    /// None of the candidate devices is managed.
    #[error("no device available for placement (candidates: {0})")]
    NoDevice(String),

    /// Every remote node refused or failed to store the block.
    #[error("no remote node accepted {0}")]
    RemoteUnavailable(memory_manager::BlockId),

    /// A layer could not be materialised into a block.
    #[error("cannot load layer '{layer}': {detail}")]
    LayerLoadError { layer: String, detail: String },

    /// Local storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
