// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tier and device bookkeeping.

use crate::{BlockId, Tier};
use resource_monitor::DeviceId;

/// Errors raised by the tier registry and the device balancer.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A tier or device has no room for the requested block.
    #[error("no capacity in {location}: requested {requested_mb} MB, {available_mb} MB available")]
    Capacity {
        location: String,
        requested_mb: u64,
        available_mb: u64,
    },

    /// A tier move could not be completed; the block stays where it was.
    #[error("cannot move {block} to {target}: {reason}")]
    Migration {
        block: BlockId,
        target: Tier,
        reason: String,
    },

    /// The block is already registered in a different tier.
    #[error("{block} is already registered in {existing}")]
    DuplicateBlock { block: BlockId, existing: Tier },

    /// The block is not known to the registry.
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    /// The device is not managed by the balancer.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// The block is not resident on the given device.
    #[error("{block} is not resident on {device}")]
    NotResident { block: BlockId, device: DeviceId },

    /// Another move of the same block is already in flight.
    #[error("{0} is busy with another move")]
    BlockBusy(BlockId),

    /// A capacity string or limit could not be interpreted.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),
}
