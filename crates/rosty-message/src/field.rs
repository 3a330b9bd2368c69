//! Field and constant descriptors for message definitions.
//!
//! A message type is an ordered list of [`Field`]s plus the constants its
//! definition declares.  Nested message fields carry the *name* of their
//! type; resolution always goes through the schema context so that the
//! type graph never holds owning references to itself.

use std::fmt;

/// The builtin primitive names, in canonical spelling.
///
/// `byte` and `char` are accepted by the parser as legacy aliases and
/// normalized to `int8` / `uint8` before a [`Field`] is built.
pub const BUILTIN_TYPES: &[&str] = &[
    "bool", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64", "float32",
    "float64", "string", "time", "duration",
];

/// True when `name` is one of the builtin primitive type names.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// One declared field of a message definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Package of the field's type; empty for builtins.
    pub package: String,
    /// Type name without package qualification (`"uint8"`, `"Header"`).
    pub ty: String,
    /// Field name.
    pub name: String,
    /// True when `ty` is a builtin primitive.
    pub builtin: bool,
    /// True for `T[]` and `T[N]` fields.
    pub array: bool,
    /// Declared array length; negative means variable-length.
    pub array_len: i32,
}

impl Field {
    /// A scalar builtin field.
    pub fn builtin(ty: &str, name: &str) -> Field {
        Field {
            package: String::new(),
            ty: ty.to_owned(),
            name: name.to_owned(),
            builtin: true,
            array: false,
            array_len: -1,
        }
    }

    /// A builtin array field; `len < 0` declares a variable-length array.
    pub fn builtin_array(ty: &str, name: &str, len: i32) -> Field {
        Field {
            array: true,
            array_len: len,
            ..Field::builtin(ty, name)
        }
    }

    /// A scalar nested-message field.
    pub fn message(package: &str, ty: &str, name: &str) -> Field {
        Field {
            package: package.to_owned(),
            ty: ty.to_owned(),
            name: name.to_owned(),
            builtin: false,
            array: false,
            array_len: -1,
        }
    }

    /// A nested-message array field; `len < 0` declares a variable-length array.
    pub fn message_array(package: &str, ty: &str, name: &str, len: i32) -> Field {
        Field {
            array: true,
            array_len: len,
            ..Field::message(package, ty, name)
        }
    }

    /// Fully-qualified type name: `pkg/Type` for nested types, the bare
    /// builtin name otherwise.
    pub fn full_type(&self) -> String {
        if self.package.is_empty() {
            self.ty.clone()
        } else {
            format!("{}/{}", self.package, self.ty)
        }
    }

    /// The declared type spelling including array brackets, as it appears
    /// in the normalized digest text for builtin fields.
    pub fn declared_type(&self) -> String {
        if !self.array {
            self.ty.clone()
        } else if self.array_len < 0 {
            format!("{}[]", self.ty)
        } else {
            format!("{}[{}]", self.ty, self.array_len)
        }
    }

    /// True for variable-length arrays (length carried on the wire).
    pub fn is_variable_array(&self) -> bool {
        self.array && self.array_len < 0
    }

    /// True for `uint8[]` / `uint8[N]` fields, whose value is a contiguous
    /// byte sequence rather than an element list.
    pub fn is_byte_array(&self) -> bool {
        self.array && self.builtin && self.ty == "uint8"
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.package.is_empty() {
            write!(f, "{} {}", self.declared_type(), self.name)
        } else {
            write!(f, "{}/{} {}", self.package, self.declared_type(), self.name)
        }
    }
}

// ---------------------------------------------------------------------------
// Constant
// ---------------------------------------------------------------------------

/// A constant declaration (`uint8 PENDING=0`).
///
/// Constants participate in the schema digest but not in the wire codec.
/// The value is kept as raw text; string constants keep everything after
/// the `=`, including embedded `#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub ty: String,
    pub name: String,
    pub value: String,
}
