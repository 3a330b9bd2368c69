//! Wire codec: length-prefixed little-endian binary.
//!
//! Primitives are little-endian; strings and variable-length arrays carry
//! a `u32` length prefix; fixed-length arrays carry none; time and
//! duration are a `(sec, nsec)` pair of `u32`; nested messages serialize
//! inline.

use crate::error::MessageError;
use crate::field::Field;
use crate::message::{DynamicMessage, MessageContext, MessageType};
use crate::value::{DurationValue, TimeValue, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Serialize an instance to wire bytes.
pub fn serialize(msg: &DynamicMessage) -> Result<Vec<u8>, MessageError> {
    let mut buf = Vec::new();
    write_message(&mut buf, msg)?;
    Ok(buf)
}

/// Deserialize wire bytes into an instance of `ty`.
///
/// Trailing bytes beyond the declared content are ignored; input that
/// ends early fails with a short read.
pub fn deserialize(
    ctx: &MessageContext,
    ty: &Arc<MessageType>,
    data: &[u8],
) -> Result<DynamicMessage, MessageError> {
    let mut cursor = Cursor { data, pos: 0 };
    read_message(ctx, ty, &mut cursor)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_message(buf: &mut Vec<u8>, msg: &DynamicMessage) -> Result<(), MessageError> {
    for field in msg.message_type().fields() {
        write_field(buf, field, msg.get(&field.name)?)?;
    }
    Ok(())
}

fn write_field(buf: &mut Vec<u8>, field: &Field, value: &Value) -> Result<(), MessageError> {
    match value {
        Value::Bytes(bytes) if field.is_byte_array() => {
            if field.is_variable_array() {
                write_len(buf, bytes.len(), field)?;
            } else if bytes.len() != field.array_len as usize {
                return Err(mismatch(field));
            }
            buf.extend_from_slice(bytes);
            Ok(())
        }
        Value::Array(items) if field.array && !field.is_byte_array() => {
            if field.is_variable_array() {
                write_len(buf, items.len(), field)?;
            } else if items.len() != field.array_len as usize {
                return Err(mismatch(field));
            }
            for item in items {
                write_scalar(buf, field, item)?;
            }
            Ok(())
        }
        _ if field.array => Err(mismatch(field)),
        value => write_scalar(buf, field, value),
    }
}

fn write_scalar(buf: &mut Vec<u8>, field: &Field, value: &Value) -> Result<(), MessageError> {
    match value {
        Value::Bool(b) => buf.push(u8::from(*b)),
        Value::I8(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::I16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::U8(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::U16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::F64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => {
            write_len(buf, s.len(), field)?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Time(t) => {
            buf.extend_from_slice(&t.sec.to_le_bytes());
            buf.extend_from_slice(&t.nsec.to_le_bytes());
        }
        Value::Duration(d) => {
            buf.extend_from_slice(&d.sec.to_le_bytes());
            buf.extend_from_slice(&d.nsec.to_le_bytes());
        }
        Value::Message(m) => write_message(buf, m)?,
        Value::Bytes(_) | Value::Array(_) => return Err(mismatch(field)),
    }
    Ok(())
}

fn write_len(buf: &mut Vec<u8>, len: usize, field: &Field) -> Result<(), MessageError> {
    let len = u32::try_from(len).map_err(|_| mismatch(field))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn mismatch(field: &Field) -> MessageError {
    MessageError::TypeMismatch {
        field: field.name.clone(),
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MessageError> {
        if self.data.len() - self.pos < n {
            return Err(MessageError::ShortRead);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, MessageError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("slice of 4")))
    }
}

fn read_message(
    ctx: &MessageContext,
    ty: &Arc<MessageType>,
    cursor: &mut Cursor<'_>,
) -> Result<DynamicMessage, MessageError> {
    let mut values = HashMap::with_capacity(ty.fields().len());
    for field in ty.fields() {
        values.insert(field.name.clone(), read_field(ctx, field, cursor)?);
    }
    Ok(DynamicMessage::from_parts(ty.clone(), values))
}

fn read_field(
    ctx: &MessageContext,
    field: &Field,
    cursor: &mut Cursor<'_>,
) -> Result<Value, MessageError> {
    if !field.array {
        return read_scalar(ctx, field, cursor);
    }
    let len = if field.is_variable_array() {
        cursor.u32_le()? as usize
    } else {
        field.array_len as usize
    };
    if field.is_byte_array() {
        return Ok(Value::Bytes(cursor.take(len)?.to_vec()));
    }
    let mut items = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        items.push(read_scalar(ctx, field, cursor)?);
    }
    Ok(Value::Array(items))
}

fn read_scalar(
    ctx: &MessageContext,
    field: &Field,
    cursor: &mut Cursor<'_>,
) -> Result<Value, MessageError> {
    if !field.builtin {
        let nested = ctx.message_type(&field.full_type())?;
        return Ok(Value::Message(read_message(ctx, &nested, cursor)?));
    }
    Ok(match field.ty.as_str() {
        "bool" => Value::Bool(cursor.take(1)?[0] != 0),
        "int8" => Value::I8(cursor.take(1)?[0] as i8),
        "int16" => Value::I16(i16::from_le_bytes(cursor.take(2)?.try_into().expect("2"))),
        "int32" => Value::I32(i32::from_le_bytes(cursor.take(4)?.try_into().expect("4"))),
        "int64" => Value::I64(i64::from_le_bytes(cursor.take(8)?.try_into().expect("8"))),
        "uint8" => Value::U8(cursor.take(1)?[0]),
        "uint16" => Value::U16(u16::from_le_bytes(cursor.take(2)?.try_into().expect("2"))),
        "uint32" => Value::U32(cursor.u32_le()?),
        "uint64" => Value::U64(u64::from_le_bytes(cursor.take(8)?.try_into().expect("8"))),
        "float32" => Value::F32(f32::from_le_bytes(cursor.take(4)?.try_into().expect("4"))),
        "float64" => Value::F64(f64::from_le_bytes(cursor.take(8)?.try_into().expect("8"))),
        "string" => {
            let len = cursor.u32_le()? as usize;
            let bytes = cursor.take(len)?;
            Value::String(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| MessageError::Parse(format!("invalid UTF-8 in field {}", field.name)))?,
            )
        }
        "time" => Value::Time(TimeValue {
            sec: cursor.u32_le()?,
            nsec: cursor.u32_le()?,
        }),
        "duration" => Value::Duration(DurationValue {
            sec: cursor.u32_le()?,
            nsec: cursor.u32_le()?,
        }),
        other => return Err(MessageError::UnimplementedPrimitive(other.to_owned())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticSchemaLoader;

    fn context() -> MessageContext {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/Inner", "int16 a\nstring tag\n");
        loader.insert(
            "pkg/Everything",
            "bool flag\nint8 i8\nint16 i16\nint32 i32\nint64 i64\n\
             uint8 u8\nuint16 u16\nuint32 u32\nuint64 u64\n\
             float32 f32\nfloat64 f64\nstring s\ntime t\nduration d\n\
             uint8[] blob\nuint8[3] fixed_blob\nint32[] nums\nfloat64[2] pair\n\
             Inner one\nInner[] many\n",
        );
        MessageContext::new(Box::new(loader))
    }

    fn sample(ctx: &MessageContext) -> DynamicMessage {
        let mut inner = ctx.new_message("pkg/Inner").unwrap();
        inner.set("a", Value::I16(-5)).unwrap();
        inner.set("tag", Value::String("inner".to_owned())).unwrap();

        let mut msg = ctx.new_message("pkg/Everything").unwrap();
        msg.set("flag", Value::Bool(true)).unwrap();
        msg.set("i8", Value::I8(-8)).unwrap();
        msg.set("i16", Value::I16(-1600)).unwrap();
        msg.set("i32", Value::I32(-320_000)).unwrap();
        msg.set("i64", Value::I64(-64_000_000_000)).unwrap();
        msg.set("u8", Value::U8(8)).unwrap();
        msg.set("u16", Value::U16(1600)).unwrap();
        msg.set("u32", Value::U32(320_000)).unwrap();
        msg.set("u64", Value::U64(64_000_000_000)).unwrap();
        msg.set("f32", Value::F32(1.5)).unwrap();
        msg.set("f64", Value::F64(-2.25)).unwrap();
        msg.set("s", Value::String("hello".to_owned())).unwrap();
        msg.set("t", Value::Time(TimeValue::new(10, 20))).unwrap();
        msg.set("d", Value::Duration(DurationValue { sec: 1, nsec: 2 }))
            .unwrap();
        msg.set("blob", Value::Bytes(vec![0xde, 0xad])).unwrap();
        msg.set("fixed_blob", Value::Bytes(vec![1, 2, 3])).unwrap();
        msg.set(
            "nums",
            Value::Array(vec![Value::I32(1), Value::I32(-2), Value::I32(3)]),
        )
        .unwrap();
        msg.set("pair", Value::Array(vec![Value::F64(0.5), Value::F64(1.5)]))
            .unwrap();
        msg.set("one", Value::Message(inner.clone())).unwrap();
        msg.set("many", Value::Array(vec![Value::Message(inner)]))
            .unwrap();
        msg
    }

    #[test]
    fn round_trip_is_identity() {
        let ctx = context();
        let msg = sample(&ctx);
        let bytes = serialize(&msg).unwrap();
        let back = deserialize(&ctx, msg.message_type(), &bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn zero_message_round_trips() {
        let ctx = context();
        let msg = ctx.new_message("pkg/Everything").unwrap();
        let bytes = serialize(&msg).unwrap();
        let back = deserialize(&ctx, msg.message_type(), &bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn string_and_array_prefixes_are_little_endian_u32() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/S", "string s\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/S").unwrap();
        msg.set("s", Value::String("ab".to_owned())).unwrap();
        assert_eq!(serialize(&msg).unwrap(), vec![2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn fixed_arrays_have_no_prefix() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/F", "uint8[3] data\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/F").unwrap();
        msg.set("data", Value::Bytes(vec![7, 8, 9])).unwrap();
        assert_eq!(serialize(&msg).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn fixed_array_length_mismatch_fails() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/F", "uint8[3] data\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/F").unwrap();
        msg.set("data", Value::Bytes(vec![7])).unwrap();
        let err = serialize(&msg).unwrap_err();
        assert!(matches!(err, MessageError::TypeMismatch { field } if field == "data"));
    }

    #[test]
    fn truncated_input_is_a_short_read() {
        let ctx = context();
        let msg = sample(&ctx);
        let bytes = serialize(&msg).unwrap();
        for cut in [0, 1, bytes.len() / 2, bytes.len() - 1] {
            let err = deserialize(&ctx, msg.message_type(), &bytes[..cut]).unwrap_err();
            assert!(matches!(err, MessageError::ShortRead), "cut at {cut}");
        }
    }

    #[test]
    fn string_length_beyond_input_is_a_short_read() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/S", "string s\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/S").unwrap();
        let err = deserialize(&ctx, &ty, &[10, 0, 0, 0, b'x']).unwrap_err();
        assert!(matches!(err, MessageError::ShortRead));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/N", "uint16 n\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/N").unwrap();
        let msg = deserialize(&ctx, &ty, &[0x34, 0x12, 0xff]).unwrap();
        assert_eq!(msg.get("n").unwrap(), &Value::U16(0x1234));
    }
}
