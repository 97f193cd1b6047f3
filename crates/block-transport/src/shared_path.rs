// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared-storage transport.
//!
//! Nodes that mount the same filesystem (NFS, a parallel FS, a shared SSD)
//! exchange blocks through files instead of sockets:
//!
//! ```text
//! <root>/node-<id>/<block id>.blk    one checksummed DATA packet per block
//! ```

use crate::envelope::decode_block;
use crate::transport::store_request;
use crate::{BlockTransport, PacketCodec, RemoteNode, TransportError};
use async_trait::async_trait;
use memory_manager::{Block, BlockId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Moves blocks through a directory every node can see.
#[derive(Debug)]
pub struct SharedPathTransport {
    local_id: u32,
    root: PathBuf,
    codec: PacketCodec,
    probe_seq: AtomicU64,
}

impl SharedPathTransport {
    pub fn new(local_id: u32, root: impl Into<PathBuf>, codec: PacketCodec) -> Self {
        Self {
            local_id,
            root: root.into(),
            codec,
            probe_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_dir(&self, node: &RemoteNode) -> PathBuf {
        self.root.join(format!("node-{}", node.id))
    }

    fn block_path(&self, node: &RemoteNode, id: BlockId) -> PathBuf {
        self.node_dir(node).join(format!("{}.blk", id.0))
    }
}

#[async_trait]
impl BlockTransport for SharedPathTransport {
    fn name(&self) -> &str {
        "shared-path"
    }

    async fn send(&self, node: &RemoteNode, block: &Block) -> Result<(), TransportError> {
        let bytes = self
            .codec
            .encode(&store_request(self.local_id, node, block))?;
        tokio::fs::create_dir_all(self.node_dir(node)).await?;

        // Write then rename so readers never see a torn file.
        let path = self.block_path(node, block.id());
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("wrote {} to {}", block.id(), path.display());
        Ok(())
    }

    async fn fetch(&self, node: &RemoteNode, id: BlockId) -> Result<Option<Block>, TransportError> {
        let path = self.block_path(node, id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let packet = self.codec.parse(&bytes)?;
        let block = decode_block(&packet.payload)?;
        if block.id() != id {
            return Err(TransportError::Malformed(format!(
                "{} holds {} instead of {id}",
                path.display(),
                block.id()
            )));
        }
        Ok(Some(block))
    }

    async fn probe(&self, node: &RemoteNode, payload: &[u8]) -> Result<Duration, TransportError> {
        let start = Instant::now();
        let dir = self.node_dir(node);
        tokio::fs::create_dir_all(&dir).await?;

        let seq = self.probe_seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(".probe-{}-{seq}", self.local_id));
        let result = async {
            tokio::fs::write(&path, payload).await?;
            let back = tokio::fs::read(&path).await?;
            if back.len() != payload.len() {
                return Err(TransportError::Malformed("probe read back short".to_string()));
            }
            Ok::<(), TransportError>(())
        }
        .await;
        let _ = tokio::fs::remove_file(&path).await;

        result.map(|()| start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SharedPathTransport::new(0, dir.path(), PacketCodec::default());
        let node = RemoteNode::new(4, "");
        let block = Block::with_id(BlockId(11), 2, vec![1, 2, 3, 4]);

        transport.send(&node, &block).await.unwrap();
        assert!(dir.path().join("node-4/11.blk").exists());

        let back = transport.fetch(&node, BlockId(11)).await.unwrap().unwrap();
        assert_eq!(back.payload(), block.payload());
        assert!(transport.fetch(&node, BlockId(12)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SharedPathTransport::new(0, dir.path(), PacketCodec::default());
        let node = RemoteNode::new(1, "");
        let block = Block::with_id(BlockId(3), 1, vec![9; 32]);
        transport.send(&node, &block).await.unwrap();

        let path = dir.path().join("node-1/3.blk");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            transport.fetch(&node, BlockId(3)).await,
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SharedPathTransport::new(0, dir.path(), PacketCodec::default());
        let node = RemoteNode::new(2, "");
        transport.probe(&node, &[0u8; 256]).await.unwrap();
        let leftovers = std::fs::read_dir(dir.path().join("node-2")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
