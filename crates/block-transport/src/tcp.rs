// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! TCP transport: one connection per request, bounded by a timeout.

use crate::frame::{read_frame, write_frame};
use crate::transport::{expect_ack, expect_block, fetch_request, probe_request, store_request};
use crate::{BlockTransport, Packet, PacketCodec, RemoteNode, TransportError};
use async_trait::async_trait;
use memory_manager::{Block, BlockId};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Talks to [`BlockNodeServer`](crate::BlockNodeServer)s over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    local_id: u32,
    codec: PacketCodec,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(local_id: u32, codec: PacketCodec, timeout: Duration) -> Self {
        Self {
            local_id,
            codec,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends one request packet and waits for the response packet.
    async fn exchange(&self, node: &RemoteNode, request: Packet) -> Result<Packet, TransportError> {
        let bytes = self.codec.encode(&request)?;
        let round_trip = async {
            let mut stream = TcpStream::connect(node.address.as_str()).await?;
            stream.set_nodelay(true)?;
            write_frame(&mut stream, &bytes).await?;
            let response = read_frame(&mut stream).await?.ok_or_else(|| {
                TransportError::Malformed(format!("{node} closed the connection without answering"))
            })?;
            Ok::<Packet, TransportError>(self.codec.parse(&response)?)
        };

        tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| TransportError::timeout(format!("request to {node}"), self.timeout))?
    }
}

#[async_trait]
impl BlockTransport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn send(&self, node: &RemoteNode, block: &Block) -> Result<(), TransportError> {
        let response = self
            .exchange(node, store_request(self.local_id, node, block))
            .await?;
        expect_ack(node, &response)?;
        tracing::debug!("sent {} to {node}", block.id());
        Ok(())
    }

    async fn fetch(&self, node: &RemoteNode, id: BlockId) -> Result<Option<Block>, TransportError> {
        let response = self
            .exchange(node, fetch_request(self.local_id, node, id))
            .await?;
        expect_block(node, &response)
    }

    async fn probe(&self, node: &RemoteNode, payload: &[u8]) -> Result<Duration, TransportError> {
        let start = Instant::now();
        let response = self
            .exchange(node, probe_request(self.local_id, node, payload))
            .await?;
        expect_ack(node, &response)?;
        Ok(start.elapsed())
    }
}
