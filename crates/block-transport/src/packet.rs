// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The checksummed block packet.
//!
//! # Layout (all integers big-endian)
//!
//! ```text
//! ┌───────────┬─────────┬───────────┬─────────────┬───────┬─────────┬───────────┬──────────┐
//! │ source_id │ dest_id │ type_code │ payload_len │ flags │ payload │ [sync_id] │ checksum │
//! │    u32    │   u32   │    u8     │     u32     │  u8   │  bytes  │    u64    │ 8 bytes  │
//! └───────────┴─────────┴───────────┴─────────────┴───────┴─────────┴───────────┴──────────┘
//!  ◄──────────────── 13-byte header ─────────────►
//! ```
//!
//! The checksum covers every byte before it. With [`FLAG_SECURE`] set it is
//! the first 8 bytes of SHA-256; otherwise the 64-bit wrapping byte sum.

use crate::TransportError;
use sha2::{Digest, Sha256};

/// Header length: source (4) + dest (4) + type (1) + payload length (4).
pub const HEADER_LEN: usize = 13;
/// Length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 8;
/// Smallest valid packet: header, flag byte, checksum.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + 1 + CHECKSUM_LEN;

/// A `sync_id` follows the payload.
pub const FLAG_SYNC_ID: u8 = 0x01;
/// The checksum is a truncated SHA-256.
pub const FLAG_SECURE: u8 = 0x02;
/// Liveness probe: the receiver acknowledges and discards.
pub const FLAG_PROBE: u8 = 0x04;

/// Kind of packet, carried in the `type_code` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data,
    Sync,
    Ack,
    Error,
}

impl PacketType {
    pub fn code(&self) -> u8 {
        match self {
            PacketType::Data => 1,
            PacketType::Sync => 2,
            PacketType::Ack => 3,
            PacketType::Error => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PacketType::Data),
            2 => Some(PacketType::Sync),
            3 => Some(PacketType::Ack),
            4 => Some(PacketType::Error),
            _ => None,
        }
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source_id: u32,
    pub dest_id: u32,
    pub kind: PacketType,
    pub flags: u8,
    pub payload: Vec<u8>,
    pub sync_id: Option<u64>,
}

impl Packet {
    pub fn new(source_id: u32, dest_id: u32, kind: PacketType, payload: Vec<u8>) -> Self {
        Self {
            source_id,
            dest_id,
            kind,
            flags: 0,
            payload,
            sync_id: None,
        }
    }

    /// Marks this packet as a liveness probe.
    pub fn probe(mut self) -> Self {
        self.flags |= FLAG_PROBE;
        self
    }

    /// Attaches a synchronisation id.
    pub fn with_sync_id(mut self, sync_id: u64) -> Self {
        self.sync_id = Some(sync_id);
        self
    }

    pub fn is_probe(&self) -> bool {
        self.flags & FLAG_PROBE != 0
    }
}

/// Builds and parses packets.
///
/// A secure codec builds SHA-256 packets and rejects packets without
/// [`FLAG_SECURE`]. A plain codec builds byte-sum packets and accepts
/// either kind, verifying each by its own flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    secure: bool,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PacketCodec {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Builds a plain packet carrying `data`.
    ///
    /// # Example
    /// ```
    /// use block_transport::{PacketCodec, PacketType};
    ///
    /// let codec = PacketCodec::new(true);
    /// let bytes = codec.build(1, 2, b"hello", PacketType::Data).unwrap();
    /// let packet = codec.parse(&bytes).unwrap();
    /// assert_eq!(packet.payload, b"hello");
    /// ```
    pub fn build(
        &self,
        source_id: u32,
        dest_id: u32,
        data: &[u8],
        kind: PacketType,
    ) -> Result<Vec<u8>, TransportError> {
        self.encode(&Packet::new(source_id, dest_id, kind, data.to_vec()))
    }

    /// Serialises `packet`, setting the sync-id and secure flags as needed.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, TransportError> {
        let payload_len =
            u32::try_from(packet.payload.len()).map_err(|_| TransportError::PayloadTooLarge {
                len: packet.payload.len(),
                max: u32::MAX as usize,
            })?;

        let mut flags = packet.flags & FLAG_PROBE;
        if packet.sync_id.is_some() {
            flags |= FLAG_SYNC_ID;
        }
        if self.secure {
            flags |= FLAG_SECURE;
        }

        let sync_len = if packet.sync_id.is_some() { 8 } else { 0 };
        let mut out =
            Vec::with_capacity(MIN_PACKET_LEN + packet.payload.len() + sync_len);
        out.extend_from_slice(&packet.source_id.to_be_bytes());
        out.extend_from_slice(&packet.dest_id.to_be_bytes());
        out.push(packet.kind.code());
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.push(flags);
        out.extend_from_slice(&packet.payload);
        if let Some(sync_id) = packet.sync_id {
            out.extend_from_slice(&sync_id.to_be_bytes());
        }
        let checksum = checksum(&out, self.secure);
        out.extend_from_slice(&checksum);
        Ok(out)
    }

    /// Parses and verifies a packet.
    pub fn parse(&self, bytes: &[u8]) -> Result<Packet, TransportError> {
        if bytes.len() < MIN_PACKET_LEN {
            return Err(TransportError::Malformed(format!(
                "packet of {} bytes is shorter than the {MIN_PACKET_LEN}-byte minimum",
                bytes.len()
            )));
        }

        let source_id = read_u32(bytes, 0);
        let dest_id = read_u32(bytes, 4);
        let type_code = bytes[8];
        let payload_len = read_u32(bytes, 9) as usize;
        let flags = bytes[HEADER_LEN];

        let kind = PacketType::from_code(type_code)
            .ok_or_else(|| TransportError::Malformed(format!("unknown type code {type_code}")))?;
        if self.secure && flags & FLAG_SECURE == 0 {
            return Err(TransportError::Malformed(
                "unsigned packet rejected by secure codec".to_string(),
            ));
        }

        let sync_len = if flags & FLAG_SYNC_ID != 0 { 8 } else { 0 };
        let expected = MIN_PACKET_LEN
            .checked_add(payload_len)
            .and_then(|n| n.checked_add(sync_len))
            .ok_or_else(|| TransportError::Malformed("payload length overflows".to_string()))?;
        if bytes.len() != expected {
            return Err(TransportError::Malformed(format!(
                "declared {payload_len}-byte payload needs {expected} bytes, got {}",
                bytes.len()
            )));
        }

        let body_end = bytes.len() - CHECKSUM_LEN;
        let computed = checksum(&bytes[..body_end], flags & FLAG_SECURE != 0);
        let carried = &bytes[body_end..];
        if computed.as_slice() != carried {
            return Err(TransportError::ChecksumMismatch {
                expected: u64::from_be_bytes(to_array(carried)),
                actual: u64::from_be_bytes(computed),
            });
        }

        let payload_start = HEADER_LEN + 1;
        let payload_end = payload_start + payload_len;
        let sync_id = (sync_len > 0)
            .then(|| u64::from_be_bytes(to_array(&bytes[payload_end..payload_end + 8])));

        Ok(Packet {
            source_id,
            dest_id,
            kind,
            flags,
            payload: bytes[payload_start..payload_end].to_vec(),
            sync_id,
        })
    }
}

/// Computes the 8-byte checksum of `bytes`.
fn checksum(bytes: &[u8], secure: bool) -> [u8; CHECKSUM_LEN] {
    if secure {
        let digest = Sha256::digest(bytes);
        to_array(&digest[..CHECKSUM_LEN])
    } else {
        let sum = bytes
            .iter()
            .fold(0u64, |acc, b| acc.wrapping_add(u64::from(*b)));
        sum.to_be_bytes()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Copies exactly eight bytes; callers guarantee the length.
fn to_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_parse_hello() {
        let codec = PacketCodec::new(true);
        let bytes = codec.build(1, 2, b"hello", PacketType::Data).unwrap();
        assert_eq!(bytes.len(), MIN_PACKET_LEN + 5);

        let packet = codec.parse(&bytes).unwrap();
        assert_eq!(packet.source_id, 1);
        assert_eq!(packet.dest_id, 2);
        assert_eq!(packet.kind, PacketType::Data);
        assert_eq!(packet.payload, b"hello");
        assert_eq!(packet.sync_id, None);
        assert_eq!(packet.flags, FLAG_SECURE);
    }

    #[test]
    fn test_header_layout() {
        let bytes = PacketCodec::new(false)
            .build(0x0102_0304, 7, b"ab", PacketType::Ack)
            .unwrap();
        assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(bytes[8], 3);
        assert_eq!(&bytes[9..13], &[0, 0, 0, 2]);
        assert_eq!(bytes[13], 0);
        assert_eq!(&bytes[14..16], b"ab");
    }

    #[test]
    fn test_sum_checksum() {
        let bytes = PacketCodec::new(false)
            .build(0, 0, &[1, 2, 3], PacketType::Data)
            .unwrap();
        let body: u64 = bytes[..bytes.len() - 8].iter().map(|b| u64::from(*b)).sum();
        assert_eq!(&bytes[bytes.len() - 8..], &body.to_be_bytes());
    }

    #[test]
    fn test_sync_id_and_probe() {
        let codec = PacketCodec::default();
        let packet = Packet::new(3, 4, PacketType::Sync, vec![9; 8])
            .with_sync_id(42)
            .probe();
        let parsed = codec.parse(&codec.encode(&packet).unwrap()).unwrap();
        assert_eq!(parsed.sync_id, Some(42));
        assert!(parsed.is_probe());
        assert_eq!(parsed.flags, FLAG_SYNC_ID | FLAG_SECURE | FLAG_PROBE);
    }

    #[test]
    fn test_secure_codec_rejects_unsigned_packet() {
        let plain = PacketCodec::new(false)
            .build(1, 2, b"tampered", PacketType::Data)
            .unwrap();
        assert!(matches!(
            PacketCodec::new(true).parse(&plain),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_plain_codec_accepts_signed_packet() {
        let signed = PacketCodec::new(true)
            .build(1, 2, b"x", PacketType::Data)
            .unwrap();
        let packet = PacketCodec::new(false).parse(&signed).unwrap();
        assert_eq!(packet.flags, FLAG_SECURE);
    }

    #[test]
    fn test_corruption_detected() {
        let codec = PacketCodec::new(true);
        let mut bytes = codec.build(1, 2, b"hello", PacketType::Data).unwrap();
        bytes[15] ^= 0xFF;
        assert!(matches!(
            codec.parse(&bytes),
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed() {
        let codec = PacketCodec::default();
        assert!(matches!(
            codec.parse(&[0u8; 5]),
            Err(TransportError::Malformed(_))
        ));

        let mut bytes = codec.build(1, 2, b"hello", PacketType::Data).unwrap();
        bytes.pop();
        assert!(matches!(codec.parse(&bytes), Err(TransportError::Malformed(_))));

        let mut bytes = codec.build(1, 2, b"", PacketType::Data).unwrap();
        bytes[8] = 99;
        assert!(matches!(codec.parse(&bytes), Err(TransportError::Malformed(_))));
    }
}
