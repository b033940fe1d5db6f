//! Stored JSON representation of documents in the relational backend.
//!
//! JSON cannot carry key order or the distinction between, say, an int32
//! and a double, so every stored document embeds a schema under `$s`:
//!
//! ```json
//! {
//!   "$s": {
//!     "$k": ["_id", "v", "tags"],
//!     "p": {
//!       "_id": {"t": "objectId"},
//!       "v": {"t": "int"},
//!       "tags": {"t": "array", "i": [{"t": "string"}]}
//!     }
//!   },
//!   "_id": "65a7f0c0e4b0a1b2c3d4e5f6",
//!   "v": 42,
//!   "tags": ["a"]
//! }
//! ```
//!
//! Nested documents carry their own schema in the property descriptor
//! (`{"t": "object", "$s": {...}}`). Regular expressions keep their options
//! in `o` and binary values their subtype in `s`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document, Regex, Timestamp};
use serde_json::{Map, Value};

use crate::error::DecodeError;

const SCHEMA: &str = "$s";
const KEYS: &str = "$k";
const PROPERTIES: &str = "p";
const TYPE: &str = "t";
const ITEMS: &str = "i";
const OPTIONS: &str = "o";
const SUBTYPE: &str = "s";

/// Encode a document for storage.
///
/// # Panics
///
/// Panics if the document holds a value outside the supported model.
pub fn marshal(doc: &Document) -> Vec<u8> {
    let (values, schema) = encode_document(doc);
    let mut row = Map::with_capacity(values.len() + 1);
    row.insert(SCHEMA.to_string(), schema);
    row.extend(values);
    Value::Object(row).to_string().into_bytes()
}

/// Encode a lone value without its type descriptor, as bound to a query
/// parameter.
///
/// # Panics
///
/// Panics if the value is outside the supported model.
pub fn marshal_single_value(value: &Bson) -> String {
    encode_value(value).0.to_string()
}

/// The type tag stored in a value's descriptor.
///
/// # Panics
///
/// Panics if the value is outside the supported model.
pub fn type_of_value(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Null => "null",
        Bson::Binary(_) => "binData",
        Bson::RegularExpression(_) => "regex",
        Bson::Timestamp(_) => "timestamp",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        other => panic!("unexpected type of value: {other:?}"),
    }
}

pub fn unmarshal(raw: &[u8]) -> Result<Document, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(map) = value else {
        return Err(DecodeError::Malformed("stored row is not an object".into()));
    };
    let schema = map
        .get(SCHEMA)
        .ok_or_else(|| DecodeError::Malformed("stored row has no $s schema".into()))?;
    decode_document(&map, schema)
}

fn encode_document(doc: &Document) -> (Map<String, Value>, Value) {
    let mut values = Map::with_capacity(doc.len());
    let mut keys = Vec::with_capacity(doc.len());
    let mut properties = Map::with_capacity(doc.len());
    for (key, value) in doc {
        let (encoded, descriptor) = encode_value(value);
        keys.push(Value::String(key.clone()));
        properties.insert(key.clone(), descriptor);
        values.insert(key.clone(), encoded);
    }
    let mut schema = Map::with_capacity(2);
    schema.insert(KEYS.to_string(), Value::Array(keys));
    schema.insert(PROPERTIES.to_string(), Value::Object(properties));
    (values, Value::Object(schema))
}

fn encode_value(value: &Bson) -> (Value, Value) {
    let tag = type_of_value(value);
    let mut descriptor = Map::new();
    descriptor.insert(TYPE.to_string(), Value::String(tag.to_string()));

    let encoded = match value {
        Bson::Double(f) => encode_double(*f),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::DateTime(dt) => Value::from(dt.timestamp_millis()),
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) => Value::from(*n),
        Bson::Null => Value::Null,
        Bson::Binary(bin) => {
            descriptor.insert(SUBTYPE.to_string(), Value::from(u8::from(bin.subtype)));
            Value::String(STANDARD.encode(&bin.bytes))
        }
        Bson::RegularExpression(re) => {
            descriptor.insert(OPTIONS.to_string(), Value::String(re.options.as_str().to_string()));
            Value::String(re.pattern.as_str().to_string())
        }
        Bson::Timestamp(ts) => Value::from((u64::from(ts.time) << 32) | u64::from(ts.increment)),
        Bson::Document(doc) => {
            let (values, schema) = encode_document(doc);
            descriptor.insert(SCHEMA.to_string(), schema);
            Value::Object(values)
        }
        Bson::Array(items) => {
            let (values, descriptors): (Vec<_>, Vec<_>) = items.iter().map(encode_value).unzip();
            descriptor.insert(ITEMS.to_string(), Value::Array(descriptors));
            Value::Array(values)
        }
        other => panic!("unexpected type of value: {other:?}"),
    };
    (encoded, Value::Object(descriptor))
}

fn encode_double(f: f64) -> Value {
    if f.is_nan() {
        Value::String("NaN".into())
    } else if f == f64::INFINITY {
        Value::String("Infinity".into())
    } else if f == f64::NEG_INFINITY {
        Value::String("-Infinity".into())
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

fn decode_document(values: &Map<String, Value>, schema: &Value) -> Result<Document, DecodeError> {
    let keys = schema
        .get(KEYS)
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::Malformed("schema has no $k key list".into()))?;
    let properties = schema
        .get(PROPERTIES)
        .and_then(Value::as_object)
        .ok_or_else(|| DecodeError::Malformed("schema has no p properties".into()))?;

    let mut doc = Document::new();
    for key in keys {
        let key = key
            .as_str()
            .ok_or_else(|| DecodeError::Malformed(format!("non-string key {key} in $k")))?;
        let descriptor = properties
            .get(key)
            .ok_or_else(|| DecodeError::UnknownField { field: key.into() })?;
        let value = values
            .get(key)
            .ok_or_else(|| DecodeError::Malformed(format!("field {key:?} listed in $k but absent")))?;
        doc.insert(key, decode_value(key, value, descriptor)?);
    }
    Ok(doc)
}

fn decode_value(field: &str, value: &Value, descriptor: &Value) -> Result<Bson, DecodeError> {
    let tag = descriptor
        .get(TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed(format!("field {field:?} has no type tag")))?;
    let mismatch = || DecodeError::FieldType {
        field: field.to_string(),
        expected: tag.to_string(),
        found: json_kind(value),
    };

    let decoded = match tag {
        "double" => Bson::Double(decode_double(value).ok_or_else(mismatch)?),
        "string" => Bson::String(value.as_str().ok_or_else(mismatch)?.to_string()),
        "objectId" => {
            let hex = value.as_str().ok_or_else(mismatch)?;
            Bson::ObjectId(
                ObjectId::parse_str(hex).map_err(|e| DecodeError::Malformed(e.to_string()))?,
            )
        }
        "bool" => Bson::Boolean(value.as_bool().ok_or_else(mismatch)?),
        "date" => Bson::DateTime(DateTime::from_millis(value.as_i64().ok_or_else(mismatch)?)),
        "int" => {
            let n = value.as_i64().ok_or_else(mismatch)?;
            Bson::Int32(i32::try_from(n).map_err(|_| mismatch())?)
        }
        "long" => Bson::Int64(value.as_i64().ok_or_else(mismatch)?),
        "null" if value.is_null() => Bson::Null,
        "null" => return Err(mismatch()),
        "binData" => {
            let encoded = value.as_str().ok_or_else(mismatch)?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| DecodeError::Malformed(format!("field {field:?}: {e}")))?;
            let subtype = descriptor
                .get(SUBTYPE)
                .and_then(Value::as_u64)
                .and_then(|s| u8::try_from(s).ok())
                .unwrap_or(0);
            Bson::Binary(Binary {
                subtype: BinarySubtype::from(subtype),
                bytes,
            })
        }
        "regex" => {
            let pattern = value.as_str().ok_or_else(mismatch)?;
            let options = descriptor.get(OPTIONS).and_then(Value::as_str).unwrap_or("");
            let invalid = |e: &dyn std::fmt::Display| {
                DecodeError::Malformed(format!("field {field:?}: {e}"))
            };
            Bson::RegularExpression(Regex {
                pattern: pattern.to_string().try_into().map_err(|e| invalid(&e))?,
                options: options.to_string().try_into().map_err(|e| invalid(&e))?,
            })
        }
        "timestamp" => {
            let packed = value.as_u64().ok_or_else(mismatch)?;
            Bson::Timestamp(Timestamp {
                time: (packed >> 32) as u32,
                increment: packed as u32,
            })
        }
        "object" => {
            let values = value.as_object().ok_or_else(mismatch)?;
            let schema = descriptor.get(SCHEMA).ok_or_else(|| {
                DecodeError::Malformed(format!("object field {field:?} has no $s schema"))
            })?;
            Bson::Document(decode_document(values, schema)?)
        }
        "array" => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let descriptors = descriptor
                .get(ITEMS)
                .and_then(Value::as_array)
                .ok_or_else(|| DecodeError::Malformed(format!("array field {field:?} has no i")))?;
            if items.len() != descriptors.len() {
                return Err(DecodeError::Malformed(format!(
                    "array field {field:?} has {} items but {} descriptors",
                    items.len(),
                    descriptors.len()
                )));
            }
            let decoded = items
                .iter()
                .zip(descriptors)
                .map(|(item, d)| decode_value(field, item, d))
                .collect::<Result<Vec<_>, _>>()?;
            Bson::Array(decoded)
        }
        other => {
            return Err(DecodeError::Malformed(format!(
                "field {field:?} has unknown type tag {other:?}"
            )));
        }
    };
    Ok(decoded)
}

fn decode_double(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde_json::json;

    use super::*;

    #[test]
    fn schema_records_key_order_and_types() {
        let raw = marshal(&doc! { "b": 1, "a": 2_i64, "c": 1.5 });
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["$s"]["$k"], json!(["b", "a", "c"]));
        assert_eq!(value["$s"]["p"]["b"]["t"], "int");
        assert_eq!(value["$s"]["p"]["a"]["t"], "long");
        assert_eq!(value["$s"]["p"]["c"]["t"], "double");
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn preserves_every_supported_type() {
        let bin = Binary {
            subtype: BinarySubtype::Uuid,
            bytes: vec![0, 1, 2, 255],
        };
        let regex = Regex {
            pattern: "^a.*".to_string().try_into().unwrap(),
            options: "i".to_string().try_into().unwrap(),
        };
        let ts = Timestamp {
            time: 7,
            increment: 3,
        };
        let doc = doc! {
            "_id": ObjectId::parse_str("65a7f0c0e4b0a1b2c3d4e5f6").unwrap(),
            "double": 42.5,
            "int": 42,
            "long": 42_i64,
            "string": "foo",
            "bool": true,
            "null": Bson::Null,
            "date": DateTime::from_millis(1_700_000_000_123),
            "bin": bin,
            "regex": regex,
            "ts": ts,
            "nested": { "z": 1, "y": [1, "two", { "x": false }] },
            "empty": [],
        };
        assert_eq!(unmarshal(&marshal(&doc)).unwrap(), doc);
    }

    #[test]
    fn non_finite_doubles_are_strings() {
        assert_eq!(marshal_single_value(&Bson::Double(f64::NAN)), r#""NaN""#);
        assert_eq!(marshal_single_value(&Bson::Double(f64::INFINITY)), r#""Infinity""#);
        let doc = doc! { "a": f64::NEG_INFINITY };
        assert_eq!(unmarshal(&marshal(&doc)).unwrap(), doc);
        let nan = unmarshal(&marshal(&doc! { "a": f64::NAN })).unwrap();
        assert!(nan.get_f64("a").unwrap().is_nan());
    }

    #[test]
    fn single_values() {
        assert_eq!(marshal_single_value(&Bson::Int32(42)), "42");
        assert_eq!(marshal_single_value(&Bson::String("42".into())), r#""42""#);
        assert_eq!(marshal_single_value(&Bson::Boolean(false)), "false");
        assert_eq!(
            marshal_single_value(&Bson::DateTime(DateTime::from_millis(5))),
            "5"
        );
    }

    #[test]
    fn type_tags() {
        assert_eq!(type_of_value(&Bson::Int32(1)), "int");
        assert_eq!(type_of_value(&Bson::Int64(1)), "long");
        assert_eq!(type_of_value(&Bson::ObjectId(ObjectId::new())), "objectId");
        assert_eq!(type_of_value(&Bson::Boolean(true)), "bool");
    }

    #[test]
    fn rows_without_schema_are_rejected() {
        let err = unmarshal(br#"{"a": 1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(matches!(unmarshal(b"[1]").unwrap_err(), DecodeError::Malformed(_)));
        assert!(matches!(unmarshal(b"not json").unwrap_err(), DecodeError::Json(_)));
    }

    #[test]
    fn wrong_stored_type_is_reported() {
        let raw = br#"{"$s": {"$k": ["a"], "p": {"a": {"t": "int"}}}, "a": "x"}"#;
        let err = unmarshal(raw).unwrap_err();
        assert!(matches!(err, DecodeError::FieldType { found: "string", .. }));
    }
}
