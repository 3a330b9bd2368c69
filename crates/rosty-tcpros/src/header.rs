//! Connection-header codec.
//!
//! The exchange opens with a header block: a `u32` total length followed
//! by length-prefixed `key=value` strings.  Subscribers send at least
//! `topic`, `md5sum`, `type`, and `callerid`; publishers reply with at
//! least `md5sum`, `type`, and `callerid` (`topic` optional).

use crate::error::TransportError;
use crate::frame;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a header block including its outer length prefix.
pub fn encode_header(fields: &[(String, String)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in fields {
        let entry = format!("{key}={value}");
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend_from_slice(entry.as_bytes());
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decode the body of a header block (outer length already consumed).
///
/// An empty block is rejected; duplicate keys keep the last value.
pub fn decode_header(body: &[u8]) -> Result<HashMap<String, String>, TransportError> {
    if body.is_empty() {
        return Err(TransportError::HeaderRejected(
            "empty connection header".to_owned(),
        ));
    }
    let mut fields = HashMap::new();
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(TransportError::HeaderRejected(
                "truncated header entry length".to_owned(),
            ));
        }
        let len = u32::from_le_bytes(rest[..4].try_into().expect("slice of 4")) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(TransportError::HeaderRejected(
                "truncated header entry".to_owned(),
            ));
        }
        let entry = std::str::from_utf8(&rest[..len]).map_err(|_| {
            TransportError::HeaderRejected("header entry is not UTF-8".to_owned())
        })?;
        rest = &rest[len..];
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            TransportError::HeaderRejected(format!("header entry without '=': {entry:?}"))
        })?;
        fields.insert(key.to_owned(), value.to_owned());
    }
    Ok(fields)
}

/// Write a full header block.
pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    fields: &[(String, String)],
) -> Result<(), TransportError> {
    writer.write_all(&encode_header(fields)).await?;
    Ok(())
}

/// Read a full header block.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<HashMap<String, String>, TransportError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = frame::decode_size(len_buf);
    if frame::is_desync(len) {
        return Err(TransportError::Desync(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    decode_header(&body)
}
