use thiserror::Error;

/// Errors surfaced by the schema system and both codecs.
///
/// The codec layer never logs; every failure is returned to the caller.
#[derive(Debug, Error)]
pub enum MessageError {
    /// A field name that does not exist on the message type.
    #[error("unknown field: {0}")]
    UnknownField(String),
    /// A value whose tag does not match the field's declared type.
    #[error("type mismatch for field {field}")]
    TypeMismatch { field: String },
    /// Wire input ended before the declared content did.
    #[error("short read")]
    ShortRead,
    /// A builtin name the codec has no encoding for.
    #[error("unimplemented primitive: {0}")]
    UnimplementedPrimitive(String),
    /// The schema loader has no definition under this name.
    #[error("unknown type: {0}")]
    UnknownType(String),
    /// Malformed schema text.
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}
