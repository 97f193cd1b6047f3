// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII claims on blocks that are being moved.
//!
//! A move that performs I/O (disk write, remote send) runs without holding
//! the registry lock. [`ClaimSet::claim`] marks the block as in flight so a
//! second mover backs off with [`MemoryError::BlockBusy`]; dropping the
//! [`ClaimGuard`] releases the claim, including on early return or panic.

use crate::{BlockId, MemoryError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// The set of blocks currently claimed by an in-flight move.
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    inner: Arc<Mutex<HashSet<BlockId>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id`, failing if another move already holds it.
    pub fn claim(&self, id: BlockId) -> Result<ClaimGuard, MemoryError> {
        if !self.inner.lock().insert(id) {
            return Err(MemoryError::BlockBusy(id));
        }
        Ok(ClaimGuard {
            id,
            set: Arc::clone(&self.inner),
        })
    }

    pub fn is_claimed(&self, id: BlockId) -> bool {
        self.inner.lock().contains(&id)
    }

    /// Number of moves in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a claim on one block until dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    id: BlockId,
    set: Arc<Mutex<HashSet<BlockId>>>,
}

impl ClaimGuard {
    pub fn block(&self) -> BlockId {
        self.id
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let claims = ClaimSet::new();
        let guard = claims.claim(BlockId(7)).unwrap();
        assert_eq!(guard.block(), BlockId(7));
        assert!(matches!(
            claims.claim(BlockId(7)),
            Err(MemoryError::BlockBusy(BlockId(7)))
        ));
        assert!(claims.claim(BlockId(8)).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let claims = ClaimSet::new();
        {
            let _guard = claims.claim(BlockId(1)).unwrap();
            assert!(claims.is_claimed(BlockId(1)));
            assert_eq!(claims.len(), 1);
        }
        assert!(claims.is_empty());
        assert!(claims.claim(BlockId(1)).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let a = ClaimSet::new();
        let b = a.clone();
        let _guard = a.claim(BlockId(3)).unwrap();
        assert!(b.is_claimed(BlockId(3)));
    }
}
