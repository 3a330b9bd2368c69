use thiserror::Error;

/// Transport-layer errors.
///
/// Connection-level failures terminate the owning subscription; the
/// aggregator logs and recovers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial {uri}: {reason}")]
    Dial { uri: String, reason: String },
    /// Handshake refused: md5sum/type mismatch or a malformed header.
    #[error("connection header rejected: {0}")]
    HeaderRejected(String),
    /// A frame-length prefix at or beyond the desynchronization bound.
    #[error("framing desynchronization (length {0:#010x})")]
    Desync(u32),
    /// Refusal to emit a frame the peer would classify as desync.
    #[error("frame too large for the wire ({0} bytes)")]
    Oversize(u32),
    #[error("master: {0}")]
    Master(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}
