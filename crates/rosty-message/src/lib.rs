//! Schema-at-runtime message system.
//!
//! Message types are parsed from definition text at runtime, memoized per
//! [`MessageContext`], and instantiated as [`DynamicMessage`] values whose
//! field tags are fixed by the schema.  Two codecs round-trip losslessly
//! with the ecosystem's compiled bindings: the length-prefixed
//! little-endian wire format ([`binary`]) and the JSON mapping ([`json`]),
//! plus a draft-07 schema mirror ([`json_schema`]).

pub mod binary;
mod error;
mod field;
pub mod json;
pub mod json_schema;
mod loader;
mod message;
mod value;

pub use error::MessageError;
pub use field::{BUILTIN_TYPES, Constant, Field, is_builtin};
pub use loader::{
    FileSchemaLoader, MessageDefinition, SCHEMA_PATH_ENV, SchemaLoader, StaticSchemaLoader,
    parse_definition,
};
pub use message::{DynamicMessage, MessageContext, MessageType, default_context};
pub use value::{DurationValue, TimeValue, Value, value_fits};
