// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Length-delimited bulk framing.
//!
//! ```text
//! [4 bytes: payload length (big-endian)] [payload]
//! ```
//!
//! Frames larger than [`MAX_FRAME_LEN`] are refused on both sides.

use crate::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length prefix size.
pub const FRAME_HEADER_LEN: usize = 4;
/// Maximum frame payload: 256 MiB.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

fn check_len(len: usize) -> Result<u32, TransportError> {
    if len > MAX_FRAME_LEN {
        return Err(TransportError::PayloadTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    // MAX_FRAME_LEN fits in u32.
    Ok(len as u32)
}

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = check_len(payload.len())?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits one frame off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and
/// otherwise the payload plus the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, TransportError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    check_len(len)?;
    let end = FRAME_HEADER_LEN + len;
    if buf.len() < end {
        return Ok(None);
    }
    Ok(Some((buf[FRAME_HEADER_LEN..end].to_vec(), end)))
}

/// Reads one frame. A clean end of stream before the header yields `None`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    check_len(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let len = check_len(payload.len())?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_partial_and_rest() {
        let mut stream = encode_frame(b"abc").unwrap();
        stream.extend_from_slice(&encode_frame(b"de").unwrap());

        assert!(decode_frame(&stream[..2]).unwrap().is_none());
        assert!(decode_frame(&stream[..5]).unwrap().is_none());

        let (first, used) = decode_frame(&stream).unwrap().unwrap();
        assert_eq!(first, b"abc");
        let (second, _) = decode_frame(&stream[used..]).unwrap().unwrap();
        assert_eq!(second, b"de");
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(matches!(
            decode_frame(&header),
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_read_write() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"block bytes").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"block bytes");
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }
}
