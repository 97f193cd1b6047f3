// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A TCP node that stores and serves blocks for its peers.
//!
//! Each accepted connection gets its own task and may carry any number of
//! request frames; the node answers each with exactly one frame.
//!
//! Peers never delete what they spill, so an unbounded node grows with
//! every distinct block it is sent. [`BlockNodeServer::with_max_blocks`]
//! caps it: new blocks beyond the cap are refused with [`ERR_FULL`] and the
//! sender moves on to its next node. Re-sending a stored block always
//! succeeds.

use crate::envelope::{decode_block, decode_block_id, encode_block};
use crate::frame::{read_frame, write_frame};
use crate::transport::{error_response, ERR_BAD_REQUEST, ERR_FULL, ERR_NOT_FOUND};
use crate::{Packet, PacketCodec, PacketType, TransportError};
use memory_manager::{Block, BlockId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

/// Serves stored blocks over the remote node protocol.
#[derive(Debug)]
pub struct BlockNodeServer {
    node_id: u32,
    codec: PacketCodec,
    blocks: Mutex<HashMap<BlockId, Block>>,
    max_blocks: Option<usize>,
}

impl BlockNodeServer {
    pub fn new(node_id: u32, codec: PacketCodec) -> Self {
        Self {
            node_id,
            codec,
            blocks: Mutex::new(HashMap::new()),
            max_blocks: None,
        }
    }

    /// Refuses new blocks once `max` are held.
    pub fn with_max_blocks(mut self, max: usize) -> Self {
        self.max_blocks = Some(max);
        self
    }

    pub fn max_blocks(&self) -> Option<usize> {
        self.max_blocks
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.lock().contains_key(&id)
    }

    /// Binds `addr` and serves in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the task handle.
    pub async fn spawn(
        self: Arc<Self>,
        addr: impl ToSocketAddrs,
    ) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                tracing::error!("block node stopped: {e}");
            }
        });
        Ok((local, handle))
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!(
            "block node {} listening on {}",
            self.node_id,
            listener.local_addr()?
        );
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::warn!("connection from {peer} failed: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), TransportError> {
        while let Some(frame) = read_frame(&mut stream).await? {
            let response = match self.codec.parse(&frame) {
                Ok(request) => self.handle(&request),
                Err(e) => {
                    tracing::warn!("rejecting malformed request: {e}");
                    let unknown = Packet::new(0, self.node_id, PacketType::Error, Vec::new());
                    error_response(&unknown, ERR_BAD_REQUEST, &e.to_string())
                }
            };
            write_frame(&mut stream, &self.codec.encode(&response)?).await?;
        }
        Ok(())
    }

    /// Answers one request packet.
    pub fn handle(&self, request: &Packet) -> Packet {
        let reply = |kind, payload| Packet::new(self.node_id, request.source_id, kind, payload);

        match request.kind {
            PacketType::Data if request.is_probe() => reply(PacketType::Ack, Vec::new()),
            PacketType::Data => match decode_block(&request.payload) {
                Ok(block) => {
                    let id = block.id();
                    let mut blocks = self.blocks.lock();
                    if let Some(max) = self.max_blocks {
                        if blocks.len() >= max && !blocks.contains_key(&id) {
                            tracing::warn!("node {} full ({max} blocks), refusing {id}", self.node_id);
                            return error_response(
                                request,
                                ERR_FULL,
                                &format!("node {} holds its limit of {max} blocks", self.node_id),
                            );
                        }
                    }
                    blocks.insert(id, block);
                    tracing::debug!("node {} stored {id}", self.node_id);
                    reply(PacketType::Ack, id.0.to_be_bytes().to_vec())
                }
                Err(e) => error_response(request, ERR_BAD_REQUEST, &e.to_string()),
            },
            PacketType::Sync => match decode_block_id(&request.payload) {
                Ok(id) => match self.blocks.lock().get(&id) {
                    Some(block) => reply(PacketType::Data, encode_block(block)),
                    None => error_response(request, ERR_NOT_FOUND, &format!("{id} not stored")),
                },
                Err(e) => error_response(request, ERR_BAD_REQUEST, &e.to_string()),
            },
            other => error_response(
                request,
                ERR_BAD_REQUEST,
                &format!("unexpected {other:?} request"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockTransport, RemoteNode, TcpTransport};
    use std::time::Duration;

    async fn start() -> (Arc<BlockNodeServer>, RemoteNode, TcpTransport) {
        let server = Arc::new(BlockNodeServer::new(7, PacketCodec::default()));
        let (addr, _handle) = Arc::clone(&server).spawn("127.0.0.1:0").await.unwrap();
        let node = RemoteNode::new(7, addr.to_string());
        let client = TcpTransport::new(1, PacketCodec::default(), Duration::from_secs(2));
        (server, node, client)
    }

    #[tokio::test]
    async fn test_store_fetch_over_tcp() {
        let (server, node, client) = start().await;
        let block = Block::with_id(BlockId(42), 8, vec![7; 1024]);

        client.send(&node, &block).await.unwrap();
        assert!(server.contains(BlockId(42)));

        let back = client.fetch(&node, BlockId(42)).await.unwrap().unwrap();
        assert_eq!(back.size_mb(), 8);
        assert_eq!(back.payload(), block.payload());
        assert!(client.fetch(&node, BlockId(43)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_does_not_store() {
        let (server, node, client) = start().await;
        client.probe(&node, &[0u8; 4096]).await.unwrap();
        assert!(server.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let client = TcpTransport::new(1, PacketCodec::default(), Duration::from_millis(200));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = RemoteNode::new(9, addr.to_string());
        assert!(client.probe(&node, b"ping").await.is_err());
    }

    #[tokio::test]
    async fn test_full_node_refuses_new_blocks() {
        let server = Arc::new(BlockNodeServer::new(7, PacketCodec::default()).with_max_blocks(1));
        let (addr, _handle) = Arc::clone(&server).spawn("127.0.0.1:0").await.unwrap();
        let node = RemoteNode::new(7, addr.to_string());
        let client = TcpTransport::new(1, PacketCodec::default(), Duration::from_secs(2));

        let first = Block::with_id(BlockId(1), 1, vec![1; 16]);
        client.send(&node, &first).await.unwrap();
        client.send(&node, &first).await.unwrap();

        let second = Block::with_id(BlockId(2), 1, vec![2; 16]);
        let err = client.send(&node, &second).await.unwrap_err();
        assert!(matches!(err, TransportError::Remote { node: 7, .. }));
        assert_eq!(server.len(), 1);
        assert!(!server.contains(BlockId(2)));
    }

    #[test]
    fn test_handle_rejects_ack() {
        let server = BlockNodeServer::new(1, PacketCodec::default());
        let response = server.handle(&Packet::new(2, 1, PacketType::Ack, Vec::new()));
        assert_eq!(response.kind, PacketType::Error);
        assert_eq!(response.dest_id, 2);
    }
}
