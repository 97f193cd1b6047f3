// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Bookkeeping for blocks spread over a memory hierarchy: which tier each
//! block lives in, how hot it is, and which device holds it.
//!
//! # Key Components
//!
//! - [`Block`] / [`BlockId`]: a fixed-size, cheaply cloneable segment of
//!   model weights or activations.
//! - [`Tier`]: `GpuPrimary → GpuCache → HostRam → LocalDisk → Remote`.
//! - [`HierarchicalMemoryManager`]: the tier registry of record, with
//!   hotness tracking and promotion/demotion policy.
//! - [`DeviceBalancer`]: bounded per-device resident sets with LRU
//!   eviction, committed through the registry.
//! - [`ClaimSet`]: RAII claims that keep two movers off the same block.
//! - [`Capacity`]: human-readable sizes (`"24G"`).
//!
//! # Ownership Model
//!
//! ```text
//!   DeviceBalancer ── Arc ──► HierarchicalMemoryManager
//!   (device sets)              (tier truth, one Mutex)
//!        │                              ▲
//!        └── allocate / evict ──────────┘  balancer lock, then registry lock
//! ```
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use memory_manager::{Block, Capacity, DeviceBalancer, DeviceSpec, HierarchicalMemoryManager, Tier};
//! use resource_monitor::DeviceId;
//!
//! let registry = Arc::new(HierarchicalMemoryManager::default());
//! let balancer = DeviceBalancer::new(
//!     Arc::clone(&registry),
//!     [DeviceSpec::new(DeviceId(0), Capacity::from_gb(24), 16)],
//! );
//!
//! let block = Block::new(512, vec![0u8; 64]);
//! balancer.allocate_block(block.clone(), DeviceId(0)).unwrap();
//! assert_eq!(registry.get_tier(block.id()), Some(Tier::GpuPrimary));
//! ```

mod balancer;
mod block;
mod capacity;
mod error;
mod guard;
mod hierarchy;
mod stats;

pub use balancer::{Allocation, BalanceOutcome, DeviceBalancer, DeviceInfo, DeviceSpec, Evicted};
pub use block::{Block, BlockId, Tier};
pub use capacity::Capacity;
pub use error::MemoryError;
pub use guard::{ClaimGuard, ClaimSet};
pub use hierarchy::{
    Admission, BlockRecord, HierarchicalMemoryManager, HotnessPolicy, TierLimit, TierMove,
    TierUsage,
};
pub use stats::RegistryStats;
