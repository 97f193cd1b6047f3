// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte stores behind the off-device tiers.
//!
//! The registry decides *which* tier a block is in; these stores only hold
//! the bytes. Capacity of the host RAM tier is enforced by the registry's
//! tier limit, not here.

use block_transport::envelope::{decode_block, encode_block};
use memory_manager::{Block, BlockId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Host-RAM copies of blocks.
#[derive(Debug, Default)]
pub struct HostRamCache {
    blocks: Mutex<HashMap<BlockId, Block>>,
}

impl HostRamCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy, replacing any previous one.
    pub fn insert(&self, block: Block) {
        self.blocks.lock().insert(block.id(), block);
    }

    pub fn get(&self, id: BlockId) -> Option<Block> {
        self.blocks.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: BlockId) -> Option<Block> {
        self.blocks.lock().remove(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached ids, sorted.
    pub fn ids(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.blocks.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Block files under a scratch directory: `<dir>/<id>.blk`.
///
/// Each file holds one block envelope (`id | size_mb | bytes`).
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Opens (and creates) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: BlockId) -> PathBuf {
        self.dir.join(format!("{}.blk", id.0))
    }

    /// Persists a block. The file appears atomically.
    pub async fn put(&self, block: &Block) -> io::Result<PathBuf> {
        let path = self.path_for(block.id());
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, encode_block(block)).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Reads a block back. `Ok(None)` if no file exists.
    pub async fn get(&self, id: BlockId) -> io::Result<Option<Block>> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let block = decode_block(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if block.id() != id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file for {id} holds {}", block.id()),
            ));
        }
        Ok(Some(block))
    }

    /// Deletes the file. Returns `false` if there was none.
    pub async fn remove(&self, id: BlockId) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.path_for(id).is_file()
    }

    /// Number of block files on disk.
    pub fn len(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "blk"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_cache() {
        let cache = HostRamCache::new();
        let b = Block::new(4, vec![1, 2]);
        cache.insert(b.clone());
        assert!(cache.contains(b.id()));
        assert_eq!(cache.ids(), vec![b.id()]);
        assert_eq!(cache.remove(b.id()).unwrap().payload(), b.payload());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_disk_put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("blocks")).unwrap();
        let b = Block::new(2, vec![9; 300]);

        let path = store.put(&b).await.unwrap();
        assert!(path.ends_with(format!("{}.blk", b.id().0)));
        assert!(store.contains(b.id()));
        assert_eq!(store.len(), 1);

        let back = store.get(b.id()).await.unwrap().unwrap();
        assert_eq!(back.size_mb(), 2);
        assert_eq!(back.payload(), b.payload());

        assert!(store.remove(b.id()).await.unwrap());
        assert!(!store.remove(b.id()).await.unwrap());
        assert!(store.get(b.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for(BlockId(5)), b"xx").unwrap();
        assert!(store.get(BlockId(5)).await.is_err());
    }
}
