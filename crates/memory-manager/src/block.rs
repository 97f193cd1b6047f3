// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blocks and the tiers they move between.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide block id counter.
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable unique identifier of a block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Allocates a fresh id from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// A fixed-size segment of model weights or activations.
///
/// `size_mb` is the logical footprint used for every capacity decision and
/// never changes. The payload is shared: cloning a `Block` clones an `Arc`,
/// not the bytes.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    size_mb: u32,
    payload: Arc<Vec<u8>>,
}

impl Block {
    /// Creates a block with a freshly allocated id.
    pub fn new(size_mb: u32, payload: Vec<u8>) -> Self {
        Self::with_id(BlockId::next(), size_mb, payload)
    }

    /// Creates a block with an explicit id (decoding, tests).
    pub fn with_id(id: BlockId, size_mb: u32, payload: Vec<u8>) -> Self {
        Self {
            id,
            size_mb,
            payload: Arc::new(payload),
        }
    }

    /// Creates a block whose payload is `payload_len` bytes of a repeating
    /// pattern derived from the id.
    pub fn synthetic(size_mb: u32, payload_len: usize) -> Self {
        let id = BlockId::next();
        let seed = id.0 as u8;
        let payload = (0..payload_len)
            .map(|i| seed.wrapping_add(i as u8))
            .collect();
        Self::with_id(id, size_mb, payload)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn size_mb(&self) -> u32 {
        self.size_mb
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a shared handle to the payload.
    pub fn shared_payload(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.payload)
    }
}

/// Where a block currently lives, fastest first.
///
/// `Ord` follows speed: `GpuPrimary < GpuCache < HostRam < LocalDisk < Remote`.
///
/// | Tier         | Alias | Storage                         |
/// |--------------|-------|---------------------------------|
/// | `GpuPrimary` | L1    | resident on the owning device   |
/// | `GpuCache`   | L2    | secondary on-device cache       |
/// | `HostRam`    | L3    | pinned host memory              |
/// | `LocalDisk`  | L5    | scratch file on local storage   |
/// | `Remote`     | L6    | another cluster node            |
///
/// The L4 alias (remote RAM) parses to [`Tier::Remote`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    GpuPrimary,
    GpuCache,
    HostRam,
    LocalDisk,
    Remote,
}

impl Tier {
    /// All tiers, fastest first.
    pub const ALL: [Tier; 5] = [
        Tier::GpuPrimary,
        Tier::GpuCache,
        Tier::HostRam,
        Tier::LocalDisk,
        Tier::Remote,
    ];

    /// Off-device tiers in spill order.
    pub const OFF_DEVICE: [Tier; 3] = [Tier::HostRam, Tier::LocalDisk, Tier::Remote];

    /// Numeric hierarchy level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::GpuPrimary => 1,
            Tier::GpuCache => 2,
            Tier::HostRam => 3,
            Tier::LocalDisk => 5,
            Tier::Remote => 6,
        }
    }

    /// The `L<n>` policy alias.
    pub fn alias(&self) -> &'static str {
        match self {
            Tier::GpuPrimary => "L1",
            Tier::GpuCache => "L2",
            Tier::HostRam => "L3",
            Tier::LocalDisk => "L5",
            Tier::Remote => "L6",
        }
    }

    /// Returns `true` for tiers that live on an accelerator.
    pub fn is_device(&self) -> bool {
        matches!(self, Tier::GpuPrimary | Tier::GpuCache)
    }

    /// Returns the next slower tier, or `None` if already slowest.
    pub fn demote(&self) -> Option<Tier> {
        match self {
            Tier::GpuPrimary => Some(Tier::GpuCache),
            Tier::GpuCache => Some(Tier::HostRam),
            Tier::HostRam => Some(Tier::LocalDisk),
            Tier::LocalDisk => Some(Tier::Remote),
            Tier::Remote => None,
        }
    }

    /// Returns the next faster tier, or `None` if already fastest.
    pub fn promote(&self) -> Option<Tier> {
        match self {
            Tier::GpuPrimary => None,
            Tier::GpuCache => Some(Tier::GpuPrimary),
            Tier::HostRam => Some(Tier::GpuCache),
            Tier::LocalDisk => Some(Tier::HostRam),
            Tier::Remote => Some(Tier::LocalDisk),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::GpuPrimary => "gpu_primary",
            Tier::GpuCache => "gpu_cache",
            Tier::HostRam => "host_ram",
            Tier::LocalDisk => "local_disk",
            Tier::Remote => "remote",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    /// Accepts the snake_case name or the `L<n>` alias, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu_primary" | "l1" => Ok(Tier::GpuPrimary),
            "gpu_cache" | "l2" => Ok(Tier::GpuCache),
            "host_ram" | "ram" | "l3" => Ok(Tier::HostRam),
            "local_disk" | "disk" | "nvme" | "l5" => Ok(Tier::LocalDisk),
            "remote" | "network" | "l4" | "l6" => Ok(Tier::Remote),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}
