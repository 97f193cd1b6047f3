// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Block envelopes carried inside DATA packets.
//!
//! ```text
//! [id: u64] [size_mb: u32] [payload bytes]
//! ```

use crate::TransportError;
use memory_manager::{Block, BlockId};

const ENVELOPE_HEADER_LEN: usize = 12;

/// Serialises a block into an envelope.
pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + block.payload().len());
    out.extend_from_slice(&block.id().0.to_be_bytes());
    out.extend_from_slice(&block.size_mb().to_be_bytes());
    out.extend_from_slice(block.payload());
    out
}

/// Rebuilds a block from an envelope.
pub fn decode_block(bytes: &[u8]) -> Result<Block, TransportError> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(TransportError::Malformed(format!(
            "block envelope of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let id = decode_block_id(&bytes[..8])?;
    let size_mb = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok(Block::with_id(id, size_mb, bytes[ENVELOPE_HEADER_LEN..].to_vec()))
}

/// Encodes a bare block id (the payload of a fetch request).
pub fn encode_block_id(id: BlockId) -> [u8; 8] {
    id.0.to_be_bytes()
}

pub fn decode_block_id(bytes: &[u8]) -> Result<BlockId, TransportError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| {
        TransportError::Malformed(format!("block id must be 8 bytes, got {}", bytes.len()))
    })?;
    Ok(BlockId(u64::from_be_bytes(array)))
}
