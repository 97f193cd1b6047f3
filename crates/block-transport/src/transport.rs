// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pluggable transport seam and the remote node request protocol.
//!
//! Every request and response is one packet inside one bulk frame:
//!
//! | Request | Packet                             | Response                        |
//! |---------|------------------------------------|---------------------------------|
//! | store   | DATA, payload = block envelope     | ACK                             |
//! | fetch   | SYNC, payload = 8-byte block id    | DATA (envelope) or ERROR        |
//! | probe   | DATA with [`FLAG_PROBE`]           | ACK                             |
//!
//! ERROR payloads are `[code: u8] [utf-8 message]`.
//!
//! [`FLAG_PROBE`]: crate::packet::FLAG_PROBE

use crate::envelope::{decode_block, encode_block, encode_block_id};
use crate::{Packet, PacketType, TransportError};
use async_trait::async_trait;
use memory_manager::{Block, BlockId};
use std::time::Duration;

/// The requested block is not stored on the node.
pub const ERR_NOT_FOUND: u8 = 0x01;
/// The request could not be understood.
pub const ERR_BAD_REQUEST: u8 = 0x02;
/// The node is at its block limit and refused a new block.
pub const ERR_FULL: u8 = 0x03;

/// A peer that can hold blocks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteNode {
    pub id: u32,
    /// `host:port` for TCP; ignored by path-based transports.
    #[serde(default)]
    pub address: String,
}

impl RemoteNode {
    pub fn new(id: u32, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl std::fmt::Display for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.is_empty() {
            write!(f, "node{}", self.id)
        } else {
            write!(f, "node{}@{}", self.id, self.address)
        }
    }
}

/// Moves blocks to and from remote nodes.
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Human-readable name of this transport (for logs).
    fn name(&self) -> &str;

    /// Stores `block` on `node`.
    async fn send(&self, node: &RemoteNode, block: &Block) -> Result<(), TransportError>;

    /// Retrieves a block. `Ok(None)` means the node does not hold it.
    async fn fetch(&self, node: &RemoteNode, id: BlockId) -> Result<Option<Block>, TransportError>;

    /// Sends `payload` as a probe and returns the round-trip time.
    async fn probe(&self, node: &RemoteNode, payload: &[u8]) -> Result<Duration, TransportError>;
}

// ── Request builders ───────────────────────────────────────────────────────

pub(crate) fn store_request(local_id: u32, node: &RemoteNode, block: &Block) -> Packet {
    Packet::new(local_id, node.id, PacketType::Data, encode_block(block)).with_sync_id(block.id().0)
}

pub(crate) fn fetch_request(local_id: u32, node: &RemoteNode, id: BlockId) -> Packet {
    Packet::new(local_id, node.id, PacketType::Sync, encode_block_id(id).to_vec())
}

pub(crate) fn probe_request(local_id: u32, node: &RemoteNode, payload: &[u8]) -> Packet {
    Packet::new(local_id, node.id, PacketType::Data, payload.to_vec()).probe()
}

/// Builds an ERROR packet answering `request`.
pub(crate) fn error_response(request: &Packet, code: u8, message: &str) -> Packet {
    let mut payload = Vec::with_capacity(1 + message.len());
    payload.push(code);
    payload.extend_from_slice(message.as_bytes());
    Packet::new(request.dest_id, request.source_id, PacketType::Error, payload)
}

/// Splits an ERROR payload into its code and message.
pub(crate) fn error_parts(packet: &Packet) -> (u8, String) {
    match packet.payload.split_first() {
        Some((code, msg)) => (*code, String::from_utf8_lossy(msg).into_owned()),
        None => (0, String::new()),
    }
}

// ── Response interpreters ──────────────────────────────────────────────────

pub(crate) fn expect_ack(node: &RemoteNode, response: &Packet) -> Result<(), TransportError> {
    match response.kind {
        PacketType::Ack => Ok(()),
        PacketType::Error => Err(TransportError::Remote {
            node: node.id,
            message: error_parts(response).1,
        }),
        other => Err(TransportError::Malformed(format!(
            "expected ACK from {node}, got {other:?}"
        ))),
    }
}

pub(crate) fn expect_block(
    node: &RemoteNode,
    response: &Packet,
) -> Result<Option<Block>, TransportError> {
    match response.kind {
        PacketType::Data => decode_block(&response.payload).map(Some),
        PacketType::Error => match error_parts(response) {
            (ERR_NOT_FOUND, _) => Ok(None),
            (_, message) => Err(TransportError::Remote {
                node: node.id,
                message,
            }),
        },
        other => Err(TransportError::Malformed(format!(
            "expected DATA from {node}, got {other:?}"
        ))),
    }
}
