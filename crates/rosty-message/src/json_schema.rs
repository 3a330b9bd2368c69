//! JSON-schema (draft-07) generation mirroring the message structure.
//!
//! Every message type involved becomes an entry under `definitions`,
//! referenced by escaped JSON pointer; recursive schemas terminate
//! naturally.  `uint8` arrays are declared as base64 strings, floats as
//! number-or-string (the codec spells non-finite values as strings).

use crate::error::MessageError;
use crate::field::Field;
use crate::message::{MessageContext, MessageType};
use serde_json::{Map, json};
use std::sync::Arc;

/// Produce the draft-07 document for `ty`.
pub fn json_schema(
    ctx: &MessageContext,
    ty: &Arc<MessageType>,
) -> Result<serde_json::Value, MessageError> {
    let mut definitions = Map::new();
    build_definition(ctx, ty, &mut definitions)?;
    Ok(json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": ty.name(),
        "$ref": format!("#/definitions/{}", pointer_escape(ty.name())),
        "definitions": definitions,
    }))
}

fn build_definition(
    ctx: &MessageContext,
    ty: &Arc<MessageType>,
    definitions: &mut Map<String, serde_json::Value>,
) -> Result<(), MessageError> {
    if definitions.contains_key(ty.name()) {
        return Ok(());
    }
    // Reserve the slot first so recursive references terminate.
    definitions.insert(ty.name().to_owned(), json!({}));
    let mut properties = Map::new();
    for field in ty.fields() {
        properties.insert(field.name.clone(), field_schema(ctx, field, definitions)?);
    }
    definitions.insert(
        ty.name().to_owned(),
        json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        }),
    );
    Ok(())
}

fn field_schema(
    ctx: &MessageContext,
    field: &Field,
    definitions: &mut Map<String, serde_json::Value>,
) -> Result<serde_json::Value, MessageError> {
    if field.is_byte_array() {
        return Ok(json!({"type": "string", "contentEncoding": "base64"}));
    }
    let element = scalar_schema(ctx, field, definitions)?;
    if !field.array {
        return Ok(element);
    }
    let mut schema = json!({"type": "array", "items": element});
    if !field.is_variable_array() {
        schema["minItems"] = json!(field.array_len);
        schema["maxItems"] = json!(field.array_len);
    }
    Ok(schema)
}

fn scalar_schema(
    ctx: &MessageContext,
    field: &Field,
    definitions: &mut Map<String, serde_json::Value>,
) -> Result<serde_json::Value, MessageError> {
    if !field.builtin {
        let nested = ctx.message_type(&field.full_type())?;
        build_definition(ctx, &nested, definitions)?;
        return Ok(json!({
            "$ref": format!("#/definitions/{}", pointer_escape(nested.name()))
        }));
    }
    Ok(match field.ty.as_str() {
        "bool" => json!({"type": "boolean"}),
        "int8" | "int16" | "int32" | "int64" => json!({"type": "integer"}),
        "uint8" | "uint16" | "uint32" | "uint64" => json!({"type": "integer", "minimum": 0}),
        "float32" | "float64" => json!({"type": ["number", "string"]}),
        "string" => json!({"type": "string"}),
        "time" | "duration" => json!({
            "type": "object",
            "properties": {
                "Sec": {"type": "integer", "minimum": 0},
                "NSec": {"type": "integer", "minimum": 0},
            },
            "additionalProperties": false,
        }),
        other => return Err(MessageError::UnimplementedPrimitive(other.to_owned())),
    })
}

/// JSON-pointer escaping for definition keys containing `/`.
fn pointer_escape(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}
