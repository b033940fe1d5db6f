//! Decoding of document-store records, which are plain JSON objects typed
//! by the collection's JSON schema.
//!
//! Supported schema types:
//!
//! | `type`    | `format`    | value      |
//! |-----------|-------------|------------|
//! | `number`  |             | Double     |
//! | `integer` | `int32`     | Int32      |
//! | `integer` | `int64`/none| Int64      |
//! | `string`  |             | String     |
//! | `string`  | `date-time` | DateTime   |
//! | `string`  | `byte`      | Binary     |
//! | `string`  | `objectid`  | ObjectId   |
//! | `boolean` |             | Boolean    |
//! | `object`  |             | Document   |
//! | `array`   |             | Array      |
//!
//! A JSON `null` decodes to Null for any declared field.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::sql::pjson::json_kind;

#[derive(Debug, Clone, PartialEq)]
enum FieldType {
    Double,
    Int32,
    Int64,
    String,
    DateTime,
    Binary,
    ObjectId,
    Boolean,
    Object(Schema),
    Array(Box<FieldType>),
}

impl FieldType {
    fn parse(field: &str, spec: &Value) -> Result<Self, DecodeError> {
        let malformed = |msg: &str| DecodeError::Malformed(format!("schema for {field:?}: {msg}"));
        let ty = spec
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing type"))?;
        let format = spec.get("format").and_then(Value::as_str);

        Ok(match (ty, format) {
            ("number", _) => FieldType::Double,
            ("integer", Some("int32")) => FieldType::Int32,
            ("integer", Some("int64") | None) => FieldType::Int64,
            ("string", None) => FieldType::String,
            ("string", Some("date-time")) => FieldType::DateTime,
            ("string", Some("byte")) => FieldType::Binary,
            ("string", Some("objectid")) => FieldType::ObjectId,
            ("boolean", _) => FieldType::Boolean,
            ("object", _) => FieldType::Object(Schema::parse_object(field, spec)?),
            ("array", _) => {
                let items = spec.get("items").ok_or_else(|| malformed("array without items"))?;
                FieldType::Array(Box::new(FieldType::parse(field, items)?))
            }
            (ty, Some(format)) => return Err(malformed(&format!("unsupported type {ty} ({format})"))),
            (ty, None) => return Err(malformed(&format!("unsupported type {ty}"))),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::Double => "number",
            FieldType::Int32 => "integer (int32)",
            FieldType::Int64 => "integer (int64)",
            FieldType::String => "string",
            FieldType::DateTime => "string (date-time)",
            FieldType::Binary => "string (byte)",
            FieldType::ObjectId => "string (objectid)",
            FieldType::Boolean => "boolean",
            FieldType::Object(_) => "object",
            FieldType::Array(_) => "array",
        }
    }

    fn decode(&self, field: &str, value: &Value) -> Result<Bson, DecodeError> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        let mismatch = || DecodeError::FieldType {
            field: field.to_string(),
            expected: self.name().to_string(),
            found: json_kind(value),
        };
        let malformed = |e: &dyn std::fmt::Display| {
            DecodeError::Malformed(format!("field {field:?}: {e}"))
        };

        Ok(match self {
            FieldType::Double => Bson::Double(value.as_f64().ok_or_else(mismatch)?),
            FieldType::Int32 => {
                let n = value.as_i64().ok_or_else(mismatch)?;
                Bson::Int32(i32::try_from(n).map_err(|e| malformed(&e))?)
            }
            FieldType::Int64 => Bson::Int64(value.as_i64().ok_or_else(mismatch)?),
            FieldType::String => Bson::String(value.as_str().ok_or_else(mismatch)?.to_string()),
            FieldType::DateTime => {
                let s = value.as_str().ok_or_else(mismatch)?;
                Bson::DateTime(DateTime::parse_rfc3339_str(s).map_err(|e| malformed(&e))?)
            }
            FieldType::Binary => {
                let s = value.as_str().ok_or_else(mismatch)?;
                Bson::Binary(Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: STANDARD.decode(s).map_err(|e| malformed(&e))?,
                })
            }
            FieldType::ObjectId => {
                let s = value.as_str().ok_or_else(mismatch)?;
                Bson::ObjectId(ObjectId::parse_str(s).map_err(|e| malformed(&e))?)
            }
            FieldType::Boolean => Bson::Boolean(value.as_bool().ok_or_else(mismatch)?),
            FieldType::Object(schema) => {
                Bson::Document(schema.decode_object(value.as_object().ok_or_else(mismatch)?)?)
            }
            FieldType::Array(items) => Bson::Array(
                value
                    .as_array()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(|item| items.decode(field, item))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// A collection's JSON schema, as far as decoding records needs it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    properties: HashMap<String, FieldType>,
}

impl Schema {
    /// Parse the schema document returned by the backend.
    pub fn from_json(schema: &Value) -> Result<Self, DecodeError> {
        Self::parse_object("", schema)
    }

    fn parse_object(field: &str, spec: &Value) -> Result<Self, DecodeError> {
        let mut properties = HashMap::new();
        if let Some(props) = spec.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                DecodeError::Malformed(format!("schema for {field:?}: properties is not an object"))
            })?;
            for (name, prop) in props {
                properties.insert(name.clone(), FieldType::parse(name, prop)?);
            }
        }
        Ok(Self { properties })
    }

    /// Decode a stored record. Fields keep the record's order.
    pub fn decode(&self, raw: &[u8]) -> Result<Document, DecodeError> {
        let value: Value = serde_json::from_slice(raw)?;
        let record = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("record is not an object".into()))?;
        self.decode_object(record)
    }

    fn decode_object(&self, record: &Map<String, Value>) -> Result<Document, DecodeError> {
        let mut doc = Document::new();
        for (field, value) in record {
            let ty = self
                .properties
                .get(field)
                .ok_or_else(|| DecodeError::UnknownField {
                    field: field.clone(),
                })?;
            doc.insert(field.clone(), ty.decode(field, value)?);
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde_json::json;

    use super::*;

    fn users() -> Schema {
        Schema::from_json(&json!({
            "title": "users",
            "properties": {
                "_id": { "type": "string", "format": "objectid" },
                "name": { "type": "string" },
                "age": { "type": "integer", "format": "int32" },
                "visits": { "type": "integer" },
                "score": { "type": "number" },
                "active": { "type": "boolean" },
                "joined": { "type": "string", "format": "date-time" },
                "avatar": { "type": "string", "format": "byte" },
                "address": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } }
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn decodes_every_type_in_record_order() {
        let raw = json!({
            "name": "alice",
            "_id": "65a7f0c0e4b0a1b2c3d4e5f6",
            "age": 30,
            "visits": 12,
            "score": 4.5,
            "active": true,
            "joined": "2024-01-02T03:04:05.006Z",
            "avatar": "AAEC",
            "address": { "city": "Oslo" },
            "tags": ["a", "b"],
        })
        .to_string();

        let doc = users().decode(raw.as_bytes()).unwrap();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys[..2], ["name", "_id"]);
        assert_eq!(doc.get_str("name").unwrap(), "alice");
        assert_eq!(
            doc.get_object_id("_id").unwrap(),
            ObjectId::parse_str("65a7f0c0e4b0a1b2c3d4e5f6").unwrap()
        );
        assert_eq!(doc.get_i32("age").unwrap(), 30);
        assert_eq!(doc.get_i64("visits").unwrap(), 12);
        assert_eq!(doc.get_f64("score").unwrap(), 4.5);
        assert!(doc.get_bool("active").unwrap());
        assert_eq!(
            doc.get_datetime("joined").unwrap().timestamp_millis(),
            1_704_164_645_006
        );
        assert_eq!(doc.get_binary_generic("avatar").unwrap(), &vec![0u8, 1, 2]);
        assert_eq!(doc.get_document("address").unwrap(), &doc! { "city": "Oslo" });
        assert_eq!(doc.get_array("tags").unwrap(), &vec![Bson::from("a"), Bson::from("b")]);
    }

    #[test]
    fn null_is_allowed_for_declared_fields() {
        let doc = users().decode(br#"{"name": null}"#).unwrap();
        assert_eq!(doc, doc! { "name": Bson::Null });
    }

    #[test]
    fn undeclared_field_is_drift() {
        let err = users().decode(br#"{"name": "bob", "nickname": "b"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownField { field } if field == "nickname"));
    }

    #[test]
    fn wrong_type_is_drift() {
        let err = users().decode(br#"{"age": "thirty"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::FieldType { found: "string", .. }));
    }

    #[test]
    fn nested_undeclared_field() {
        let err = users()
            .decode(br#"{"address": {"city": "Oslo", "zip": "0150"}}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownField { field } if field == "zip"));
    }

    #[test]
    fn unsupported_schema_type() {
        let err = Schema::from_json(&json!({"properties": {"x": {"type": "tuple"}}})).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn empty_schema_describes_nothing() {
        let schema = Schema::from_json(&json!({})).unwrap();
        assert_eq!(schema, Schema::default());
        assert_eq!(schema.decode(b"{}").unwrap(), Document::new());
        assert!(matches!(schema.decode(br#"{"a": 1}"#), Err(DecodeError::UnknownField { .. })));
    }
}
