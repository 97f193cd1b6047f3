// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # block-transport
//!
//! Moves blocks to and from remote cluster nodes.
//!
//! # Layers
//!
//! ```text
//!   BlockTransport (trait)  ── TcpTransport │ SharedPathTransport │ InMemoryTransport
//!          │
//!   remote node protocol    ── store (DATA) / fetch (SYNC) / probe (DATA + probe flag)
//!          │
//!   packet                  ── 13-byte header, flags, payload, [sync id], 8-byte checksum
//!          │
//!   frame                   ── 4-byte big-endian length prefix, 256 MiB max
//! ```
//!
//! [`BlockNodeServer`] is the receiving side of the TCP transport.
//!
//! # Example
//! ```
//! use block_transport::{PacketCodec, PacketType};
//!
//! let codec = PacketCodec::new(false);
//! let bytes = codec.build(1, 2, b"hello", PacketType::Data).unwrap();
//! let packet = codec.parse(&bytes).unwrap();
//! assert_eq!((packet.source_id, packet.dest_id), (1, 2));
//! ```

pub mod envelope;
mod error;
pub mod frame;
mod memory;
pub mod packet;
mod server;
mod shared_path;
mod tcp;
mod transport;

pub use error::TransportError;
pub use memory::InMemoryTransport;
pub use packet::{Packet, PacketCodec, PacketType};
pub use server::BlockNodeServer;
pub use shared_path::SharedPathTransport;
pub use tcp::TcpTransport;
pub use transport::{BlockTransport, RemoteNode, ERR_BAD_REQUEST, ERR_FULL, ERR_NOT_FOUND};
