//! Message types, message instances, and the schema context.
//!
//! The [`MessageContext`] is the per-process memoization arena: every
//! message type is built at most once per context and shared as an `Arc`.
//! Types refer to their nested types by fully-qualified *name*; the
//! context resolves names on demand, which keeps recursive schemas
//! (a message containing a list of itself) from forming ownership cycles.

use crate::error::MessageError;
use crate::field::{Constant, Field};
use crate::loader::{FileSchemaLoader, SchemaLoader, parse_definition};
use crate::value::{DurationValue, TimeValue, Value, value_fits};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// A message schema: fully-qualified name, digest, raw definition text,
/// ordered field list, and declared constants.
///
/// Uniquely identified by name within a [`MessageContext`].
#[derive(Debug)]
pub struct MessageType {
    name: String,
    md5: String,
    text: String,
    fields: Vec<Field>,
    constants: Vec<Constant>,
}

impl MessageType {
    /// Fully-qualified type name (`pkg/Type`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Digest of the normalized definition; the schema compatibility
    /// check exchanged during the transport handshake.
    pub fn md5sum(&self) -> &str {
        &self.md5
    }

    /// The raw definition text the type was built from.
    pub fn definition_text(&self) -> &str {
        &self.text
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// DynamicMessage
// ---------------------------------------------------------------------------

/// A message instance: a reference to its type plus one [`Value`] per
/// declared field.
#[derive(Debug, Clone)]
pub struct DynamicMessage {
    ty: Arc<MessageType>,
    values: HashMap<String, Value>,
}

impl DynamicMessage {
    pub(crate) fn from_parts(ty: Arc<MessageType>, values: HashMap<String, Value>) -> Self {
        DynamicMessage { ty, values }
    }

    pub fn message_type(&self) -> &Arc<MessageType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }

    /// Read a field value.
    pub fn get(&self, field: &str) -> Result<&Value, MessageError> {
        self.values
            .get(field)
            .ok_or_else(|| MessageError::UnknownField(field.to_owned()))
    }

    /// Overwrite a field value.  The value's variant must match the
    /// field's declared type.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), MessageError> {
        let descriptor = self
            .ty
            .field(field)
            .ok_or_else(|| MessageError::UnknownField(field.to_owned()))?;
        if !value_fits(descriptor, &value) {
            return Err(MessageError::TypeMismatch {
                field: field.to_owned(),
            });
        }
        self.values.insert(field.to_owned(), value);
        Ok(())
    }

    /// Read a nested-message field.
    pub fn get_message(&self, field: &str) -> Result<&DynamicMessage, MessageError> {
        self.get(field)?
            .as_message()
            .ok_or_else(|| MessageError::TypeMismatch {
                field: field.to_owned(),
            })
    }
}

impl PartialEq for DynamicMessage {
    fn eq(&self, other: &Self) -> bool {
        self.ty.name == other.ty.name && self.values == other.values
    }
}

// ---------------------------------------------------------------------------
// MessageContext
// ---------------------------------------------------------------------------

/// The schema arena: builds message types through a [`SchemaLoader`] and
/// memoizes them by fully-qualified name.
pub struct MessageContext {
    loader: Box<dyn SchemaLoader>,
    types: Mutex<HashMap<String, Arc<MessageType>>>,
}

impl MessageContext {
    pub fn new(loader: Box<dyn SchemaLoader>) -> Self {
        MessageContext {
            loader,
            types: Mutex::new(HashMap::new()),
        }
    }

    /// A context backed by the colon-separated schema search path from the
    /// environment (see [`FileSchemaLoader::from_env`]).
    pub fn from_env() -> Self {
        MessageContext::new(Box::new(FileSchemaLoader::from_env()))
    }

    /// Build (or fetch the memoized) message type for `name`.
    pub fn message_type(&self, name: &str) -> Result<Arc<MessageType>, MessageError> {
        let mut stack = Vec::new();
        self.build_type(name, &mut stack)
    }

    /// Parse `text` as the definition of `name` and insert it, bypassing
    /// the loader.  Used for embedded schemas and tests.  Returns the
    /// already-memoized type if `name` was built before.
    pub fn register_definition(
        &self,
        name: &str,
        text: &str,
    ) -> Result<Arc<MessageType>, MessageError> {
        if let Some(existing) = self.types.lock().expect("type cache poisoned").get(name) {
            return Ok(existing.clone());
        }
        let package = package_of(name)?;
        let (fields, constants) = parse_definition(package, text)?;
        let mut stack = vec![name.to_owned()];
        let md5 = self.compute_md5(&fields, &constants, &mut stack)?;
        let ty = Arc::new(MessageType {
            name: name.to_owned(),
            md5,
            text: text.to_owned(),
            fields,
            constants,
        });
        Ok(self.memoize(ty))
    }

    /// Build an empty instance of `name`: every field holds the zero value
    /// of its declared type.
    pub fn new_message(&self, name: &str) -> Result<DynamicMessage, MessageError> {
        let ty = self.message_type(name)?;
        self.new_message_of(&ty)
    }

    /// Build an empty instance of an already-built type.
    pub fn new_message_of(&self, ty: &Arc<MessageType>) -> Result<DynamicMessage, MessageError> {
        let mut values = HashMap::with_capacity(ty.fields.len());
        for field in &ty.fields {
            values.insert(field.name.clone(), self.zero_value(field)?);
        }
        Ok(DynamicMessage::from_parts(ty.clone(), values))
    }

    /// The zero value for a field: false/0/empty for scalars, an empty
    /// sequence for arrays of any declared length, an empty instance for
    /// nested messages.
    pub fn zero_value(&self, field: &Field) -> Result<Value, MessageError> {
        if field.is_byte_array() {
            return Ok(Value::Bytes(Vec::new()));
        }
        if field.array {
            return Ok(Value::Array(Vec::new()));
        }
        if !field.builtin {
            return Ok(Value::Message(self.new_message(&field.full_type())?));
        }
        Ok(match field.ty.as_str() {
            "bool" => Value::Bool(false),
            "int8" => Value::I8(0),
            "int16" => Value::I16(0),
            "int32" => Value::I32(0),
            "int64" => Value::I64(0),
            "uint8" => Value::U8(0),
            "uint16" => Value::U16(0),
            "uint32" => Value::U32(0),
            "uint64" => Value::U64(0),
            "float32" => Value::F32(0.0),
            "float64" => Value::F64(0.0),
            "string" => Value::String(String::new()),
            "time" => Value::Time(TimeValue::default()),
            "duration" => Value::Duration(DurationValue::default()),
            other => return Err(MessageError::UnimplementedPrimitive(other.to_owned())),
        })
    }

    fn build_type(
        &self,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<Arc<MessageType>, MessageError> {
        if let Some(existing) = self.types.lock().expect("type cache poisoned").get(name) {
            return Ok(existing.clone());
        }
        if stack.iter().any(|n| n == name) {
            return Err(MessageError::Parse(format!(
                "recursive definition involving {name}"
            )));
        }
        stack.push(name.to_owned());
        let definition = self.loader.load(name)?;
        let md5 = match definition.md5 {
            Some(md5) => md5,
            None => self.compute_md5(&definition.fields, &definition.constants, stack)?,
        };
        stack.pop();
        let ty = Arc::new(MessageType {
            name: name.to_owned(),
            md5,
            text: definition.text,
            fields: definition.fields,
            constants: definition.constants,
        });
        Ok(self.memoize(ty))
    }

    /// Digest of the normalized definition: constant declarations first in
    /// declaration order (`type name=value`), then one line per field.
    /// Builtin fields keep the declared spelling including array brackets;
    /// nested fields substitute the nested type's digest and drop the
    /// brackets.
    fn compute_md5(
        &self,
        fields: &[Field],
        constants: &[Constant],
        stack: &mut Vec<String>,
    ) -> Result<String, MessageError> {
        let mut lines = Vec::with_capacity(constants.len() + fields.len());
        for c in constants {
            lines.push(format!("{} {}={}", c.ty, c.name, c.value));
        }
        for f in fields {
            if f.builtin {
                lines.push(format!("{} {}", f.declared_type(), f.name));
            } else {
                let nested = self.build_type(&f.full_type(), stack)?;
                lines.push(format!("{} {}", nested.md5, f.name));
            }
        }
        Ok(format!("{:x}", md5::compute(lines.join("\n"))))
    }

    fn memoize(&self, ty: Arc<MessageType>) -> Arc<MessageType> {
        self.types
            .lock()
            .expect("type cache poisoned")
            .entry(ty.name.clone())
            .or_insert(ty)
            .clone()
    }
}

fn package_of(name: &str) -> Result<&str, MessageError> {
    match name.split_once('/') {
        Some((pkg, rest)) if !pkg.is_empty() && !rest.is_empty() => Ok(pkg),
        _ => Err(MessageError::Parse(format!(
            "type name {name} is not fully qualified"
        ))),
    }
}

/// Process-wide convenience context backed by the environment search path.
///
/// Library code threads an explicit [`MessageContext`]; this exists for
/// callers that genuinely want one shared context per process.
pub fn default_context() -> &'static MessageContext {
    static DEFAULT: OnceLock<MessageContext> = OnceLock::new();
    DEFAULT.get_or_init(MessageContext::from_env)
}
