// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for packets, framing, and transports.

use std::time::Duration;

/// Errors that can occur while encoding, moving, or decoding blocks.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket or file I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer did not answer in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Bytes on the wire do not form a valid packet, frame, or envelope.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// The trailing checksum does not match the packet contents.
    #[error("checksum mismatch: expected {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    /// The remote node answered with an error packet.
    #[error("remote node {node} reported: {message}")]
    Remote { node: u32, message: String },

    /// A payload exceeds what the framing can carry.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

impl TransportError {
    pub(crate) fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}
