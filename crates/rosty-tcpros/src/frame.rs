//! Frame size codec.
//!
//! Post-handshake, every message on the wire is
//! `<u32 little-endian length><length bytes>`.  A length prefix at or
//! beyond [`MAX_FRAME`] cannot be a real payload and is classified as
//! framing desynchronization; the writer side refuses to emit one.

use crate::error::TransportError;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Smallest length prefix treated as desynchronization (256 MB).
pub const MAX_FRAME: u32 = 1 << 28;

/// True when a decoded length prefix indicates a desynchronized stream.
pub fn is_desync(len: u32) -> bool {
    len >= MAX_FRAME
}

/// Encode a length prefix; refuses lengths the peer would treat as desync.
pub fn encode_size(len: u32) -> Result<[u8; 4], TransportError> {
    if is_desync(len) {
        return Err(TransportError::Oversize(len));
    }
    Ok(len.to_le_bytes())
}

/// Decode a length prefix.  The caller classifies via [`is_desync`].
pub fn decode_size(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Write one framed payload: length prefix then bytes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::Oversize(u32::MAX))?;
    writer.write_all(&encode_size(len)?).await?;
    writer.write_all(payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_round_trip() {
        for n in [0u32, 1, 4, 1024, MAX_FRAME - 1] {
            assert_eq!(decode_size(encode_size(n).unwrap()), n);
        }
    }

    #[test]
    fn oversized_lengths_are_never_emitted() {
        for n in [MAX_FRAME, MAX_FRAME + 1, u32::MAX] {
            assert!(matches!(
                encode_size(n),
                Err(TransportError::Oversize(v)) if v == n
            ));
        }
    }

    #[test]
    fn desync_boundary() {
        assert!(!is_desync(MAX_FRAME - 1));
        assert!(is_desync(MAX_FRAME));
        // 2^31 encoded little-endian: corrupt prefix from a desynced stream.
        assert_eq!(decode_size([0x00, 0x00, 0x00, 0x80]), 1 << 31);
        assert!(is_desync(1 << 31));
    }

    #[tokio::test]
    async fn write_frame_prefixes_payload() {
        let mut out = Vec::new();
        write_frame(&mut out, b"abc").await.unwrap();
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }
}
