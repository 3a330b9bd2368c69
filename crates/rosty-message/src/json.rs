//! JSON codec.
//!
//! Shapes:
//! - primitives map to their JSON scalar, except `uint8` arrays (base64
//!   string), non-finite floats (`"nan"`, `"+inf"`, `"-inf"`), and
//!   time/duration (`{"Sec": u32, "NSec": u32}`)
//! - nested messages and arrays recurse
//! - unmarshalling additionally accepts float fields encoded as JSON
//!   strings

use crate::error::MessageError;
use crate::field::Field;
use crate::message::{DynamicMessage, MessageContext, MessageType};
use crate::value::{DurationValue, TimeValue, Value};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Marshal an instance to a JSON document.
pub fn marshal(msg: &DynamicMessage) -> Result<serde_json::Value, MessageError> {
    let mut object = Map::new();
    for field in msg.message_type().fields() {
        object.insert(field.name.clone(), marshal_field(field, msg.get(&field.name)?)?);
    }
    Ok(serde_json::Value::Object(object))
}

/// Unmarshal a JSON document into an instance of `ty`.
///
/// Keys absent from the document keep their zero value; keys that are not
/// fields of `ty` fail with an unknown-field error.
pub fn unmarshal(
    ctx: &MessageContext,
    ty: &Arc<MessageType>,
    doc: &serde_json::Value,
) -> Result<DynamicMessage, MessageError> {
    let object = doc.as_object().ok_or_else(|| MessageError::Parse(format!(
        "expected a JSON object for {}",
        ty.name()
    )))?;
    for key in object.keys() {
        if ty.field(key).is_none() {
            return Err(MessageError::UnknownField(key.clone()));
        }
    }
    let mut values = HashMap::with_capacity(ty.fields().len());
    for field in ty.fields() {
        let value = match object.get(&field.name) {
            Some(encoded) => unmarshal_field(ctx, field, encoded)?,
            None => ctx.zero_value(field)?,
        };
        values.insert(field.name.clone(), value);
    }
    Ok(DynamicMessage::from_parts(ty.clone(), values))
}

// ---------------------------------------------------------------------------
// Marshalling
// ---------------------------------------------------------------------------

fn marshal_field(field: &Field, value: &Value) -> Result<serde_json::Value, MessageError> {
    match value {
        Value::Bytes(bytes) => Ok(serde_json::Value::String(BASE64.encode(bytes))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(marshal_scalar(field, item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        scalar => marshal_scalar(field, scalar),
    }
}

fn marshal_scalar(field: &Field, value: &Value) -> Result<serde_json::Value, MessageError> {
    Ok(match value {
        Value::Bool(b) => json!(b),
        Value::I8(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F32(v) => marshal_float(f64::from(*v)),
        Value::F64(v) => marshal_float(*v),
        Value::String(s) => json!(s),
        Value::Time(t) => serde_json::to_value(t)?,
        Value::Duration(d) => serde_json::to_value(d)?,
        Value::Message(m) => marshal(m)?,
        Value::Bytes(_) | Value::Array(_) => {
            return Err(MessageError::TypeMismatch {
                field: field.name.clone(),
            });
        }
    })
}

fn marshal_float(v: f64) -> serde_json::Value {
    if v.is_nan() {
        json!("nan")
    } else if v == f64::INFINITY {
        json!("+inf")
    } else if v == f64::NEG_INFINITY {
        json!("-inf")
    } else {
        Number::from_f64(v).map_or_else(|| json!("nan"), serde_json::Value::Number)
    }
}

// ---------------------------------------------------------------------------
// Unmarshalling
// ---------------------------------------------------------------------------

fn unmarshal_field(
    ctx: &MessageContext,
    field: &Field,
    encoded: &serde_json::Value,
) -> Result<Value, MessageError> {
    if field.is_byte_array() {
        let text = encoded.as_str().ok_or_else(|| mismatch(field))?;
        let bytes = BASE64.decode(text).map_err(|_| mismatch(field))?;
        if !field.is_variable_array() && bytes.len() != field.array_len as usize {
            return Err(mismatch(field));
        }
        return Ok(Value::Bytes(bytes));
    }
    if field.array {
        let items = encoded.as_array().ok_or_else(|| mismatch(field))?;
        if !field.is_variable_array() && items.len() != field.array_len as usize {
            return Err(mismatch(field));
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(unmarshal_scalar(ctx, field, item)?);
        }
        return Ok(Value::Array(out));
    }
    unmarshal_scalar(ctx, field, encoded)
}

fn unmarshal_scalar(
    ctx: &MessageContext,
    field: &Field,
    encoded: &serde_json::Value,
) -> Result<Value, MessageError> {
    if !field.builtin {
        let nested = ctx.message_type(&field.full_type())?;
        return Ok(Value::Message(unmarshal(ctx, &nested, encoded)?));
    }
    let value = match field.ty.as_str() {
        "bool" => Value::Bool(encoded.as_bool().ok_or_else(|| mismatch(field))?),
        "int8" => Value::I8(int_field(field, encoded)?),
        "int16" => Value::I16(int_field(field, encoded)?),
        "int32" => Value::I32(int_field(field, encoded)?),
        "int64" => Value::I64(encoded.as_i64().ok_or_else(|| mismatch(field))?),
        "uint8" => Value::U8(uint_field(field, encoded)?),
        "uint16" => Value::U16(uint_field(field, encoded)?),
        "uint32" => Value::U32(uint_field(field, encoded)?),
        "uint64" => Value::U64(encoded.as_u64().ok_or_else(|| mismatch(field))?),
        "float32" => {
            let v = float_field(field, encoded)?;
            Value::F32(v as f32)
        }
        "float64" => Value::F64(float_field(field, encoded)?),
        "string" => Value::String(
            encoded
                .as_str()
                .ok_or_else(|| mismatch(field))?
                .to_owned(),
        ),
        "time" => Value::Time(
            serde_json::from_value::<TimeValue>(encoded.clone()).map_err(|_| mismatch(field))?,
        ),
        "duration" => Value::Duration(
            serde_json::from_value::<DurationValue>(encoded.clone())
                .map_err(|_| mismatch(field))?,
        ),
        other => return Err(MessageError::UnimplementedPrimitive(other.to_owned())),
    };
    Ok(value)
}

fn int_field<T: TryFrom<i64>>(field: &Field, encoded: &serde_json::Value) -> Result<T, MessageError> {
    encoded
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(field))
}

fn uint_field<T: TryFrom<u64>>(field: &Field, encoded: &serde_json::Value) -> Result<T, MessageError> {
    encoded
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(field))
}

/// Floats accept a JSON number or its string form, including the
/// non-finite spellings the marshaller emits.
fn float_field(field: &Field, encoded: &serde_json::Value) -> Result<f64, MessageError> {
    match encoded {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(field)),
        serde_json::Value::String(s) => match s.as_str() {
            "nan" => Ok(f64::NAN),
            "+inf" | "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_err(|_| mismatch(field)),
        },
        _ => Err(mismatch(field)),
    }
}

fn mismatch(field: &Field) -> MessageError {
    MessageError::TypeMismatch {
        field: field.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticSchemaLoader;

    fn context() -> MessageContext {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/Inner", "uint8 code\nstring tag\n");
        loader.insert(
            "pkg/Mixed",
            "bool flag\nint32 n\nuint64 big\nfloat32 f\nfloat64 g\nstring s\n\
             time t\nduration d\nuint8[] blob\nint16[] xs\nInner one\nInner[] many\n",
        );
        MessageContext::new(Box::new(loader))
    }

    #[test]
    fn byte_arrays_marshal_as_base64() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/Blob", "uint8[] data\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/Blob").unwrap();
        msg.set(
            "data",
            Value::Bytes(vec![0xf0, 0xde, 0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12]),
        )
        .unwrap();
        let doc = marshal(&msg).unwrap();
        assert_eq!(doc, json!({"data": "8N68mnhWNBI="}));
        let back = unmarshal(&ctx, msg.message_type(), &doc).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn time_marshals_as_sec_nsec_object() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/T", "time t\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/T").unwrap();
        msg.set("t", Value::Time(TimeValue::new(12, 34))).unwrap();
        let doc = marshal(&msg).unwrap();
        assert_eq!(doc, json!({"t": {"Sec": 12, "NSec": 34}}));
        assert_eq!(unmarshal(&ctx, msg.message_type(), &doc).unwrap(), msg);
    }

    #[test]
    fn non_finite_floats_marshal_as_strings() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/F", "float32 a\nfloat64 b\nfloat64 c\n");
        let ctx = MessageContext::new(Box::new(loader));
        let mut msg = ctx.new_message("pkg/F").unwrap();
        msg.set("a", Value::F32(f32::NAN)).unwrap();
        msg.set("b", Value::F64(f64::INFINITY)).unwrap();
        msg.set("c", Value::F64(f64::NEG_INFINITY)).unwrap();
        let doc = marshal(&msg).unwrap();
        assert_eq!(doc, json!({"a": "nan", "b": "+inf", "c": "-inf"}));

        let back = unmarshal(&ctx, msg.message_type(), &doc).unwrap();
        match back.get("a").unwrap() {
            Value::F32(v) => assert!(v.is_nan()),
            other => panic!("expected F32, got {other:?}"),
        }
        assert_eq!(back.get("b").unwrap(), &Value::F64(f64::INFINITY));
        assert_eq!(back.get("c").unwrap(), &Value::F64(f64::NEG_INFINITY));
    }

    #[test]
    fn floats_accept_string_encoded_numbers() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/F", "float64 x\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/F").unwrap();
        let msg = unmarshal(&ctx, &ty, &json!({"x": "2.5"})).unwrap();
        assert_eq!(msg.get("x").unwrap(), &Value::F64(2.5));
    }

    #[test]
    fn round_trip_is_deep_equal() {
        let ctx = context();
        let mut inner = ctx.new_message("pkg/Inner").unwrap();
        inner.set("code", Value::U8(3)).unwrap();
        inner.set("tag", Value::String("t".to_owned())).unwrap();

        let mut msg = ctx.new_message("pkg/Mixed").unwrap();
        msg.set("flag", Value::Bool(true)).unwrap();
        msg.set("n", Value::I32(-7)).unwrap();
        msg.set("big", Value::U64(u64::MAX)).unwrap();
        msg.set("f", Value::F32(0.5)).unwrap();
        msg.set("g", Value::F64(-1.25)).unwrap();
        msg.set("s", Value::String("text".to_owned())).unwrap();
        msg.set("t", Value::Time(TimeValue::new(1, 2))).unwrap();
        msg.set("d", Value::Duration(DurationValue { sec: 3, nsec: 4 }))
            .unwrap();
        msg.set("blob", Value::Bytes(vec![1, 2, 3])).unwrap();
        msg.set("xs", Value::Array(vec![Value::I16(-1), Value::I16(2)]))
            .unwrap();
        msg.set("one", Value::Message(inner.clone())).unwrap();
        msg.set("many", Value::Array(vec![Value::Message(inner)]))
            .unwrap();

        let doc = marshal(&msg).unwrap();
        let back = unmarshal(&ctx, msg.message_type(), &doc).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/N", "int32 x\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/N").unwrap();
        let err = unmarshal(&ctx, &ty, &json!({"x": 1, "bogus": 2})).unwrap_err();
        assert!(matches!(err, MessageError::UnknownField(f) if f == "bogus"));
    }

    #[test]
    fn missing_keys_keep_zero_values() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/N", "int32 x\nstring s\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/N").unwrap();
        let msg = unmarshal(&ctx, &ty, &json!({"x": 5})).unwrap();
        assert_eq!(msg.get("x").unwrap(), &Value::I32(5));
        assert_eq!(msg.get("s").unwrap(), &Value::String(String::new()));
    }

    #[test]
    fn out_of_range_integers_are_type_mismatches() {
        let mut loader = StaticSchemaLoader::new();
        loader.insert("pkg/N", "uint8 x\n");
        let ctx = MessageContext::new(Box::new(loader));
        let ty = ctx.message_type("pkg/N").unwrap();
        let err = unmarshal(&ctx, &ty, &json!({"x": 300})).unwrap_err();
        assert!(matches!(err, MessageError::TypeMismatch { field } if field == "x"));
    }
}
