use std::str::FromStr;

use bson::{Bson, Document};
use docbridge_query::{Operator, Path, PathErrorKind, PushdownValue, Scalar, classify};
use serde_json::{Map, Value};

use crate::error::QueryError;

/// Compile the part of `filter` the document store evaluates exactly into
/// its native JSON filter.
///
/// Only top-level equality on strings, integers, booleans and object ids is
/// pushed down. The result is `{}` when nothing is, `{"k": v}` for a single
/// condition and `{"$and": [...]}` otherwise.
pub fn build_filter(filter: Option<&Document>) -> Result<Value, QueryError> {
    let mut conditions = Vec::new();

    for (key, value) in filter.into_iter().flatten() {
        if key.starts_with('$') {
            continue;
        }
        match Path::from_str(key) {
            Ok(path) if !path.is_single() => continue,
            Ok(_) => {}
            Err(err) if err.kind() == PathErrorKind::EmptyKey => continue,
            Err(err) => return Err(err.into()),
        }

        match value {
            Bson::Document(ops) => {
                for (op, operand) in ops {
                    if Operator::parse(op) != Some(Operator::Eq) {
                        continue;
                    }
                    if let Some(v) = pushable(operand) {
                        conditions.push(condition(key, v));
                    }
                }
            }
            value => {
                if let Some(v) = pushable(value) {
                    conditions.push(condition(key, v));
                }
            }
        }
    }

    Ok(match conditions.len() {
        0 => Value::Object(Map::new()),
        1 => conditions.remove(0),
        _ => {
            let mut and = Map::new();
            and.insert("$and".to_string(), Value::Array(conditions));
            Value::Object(and)
        }
    })
}

fn pushable(value: &Bson) -> Option<Value> {
    match classify(value) {
        PushdownValue::Scalar(Scalar::String(s)) => Some(Value::from(s)),
        PushdownValue::Scalar(Scalar::Int32(n)) => Some(Value::from(n)),
        PushdownValue::Scalar(Scalar::Int64(n)) => Some(Value::from(n)),
        PushdownValue::Scalar(Scalar::Boolean(b)) => Some(Value::from(b)),
        PushdownValue::Scalar(Scalar::ObjectId(oid)) => Some(Value::from(oid.to_hex())),
        // Doubles and dates are stored in forms the backend compares
        // differently.
        PushdownValue::Scalar(Scalar::Double(_) | Scalar::DateTime(_)) => None,
        PushdownValue::Unsupported => None,
    }
}

fn condition(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;
    use bson::{DateTime, doc};
    use serde_json::json;

    use super::*;

    #[test]
    fn nothing_pushed_is_empty_object() {
        assert_eq!(build_filter(None).unwrap(), json!({}));
        assert_eq!(build_filter(Some(&doc! { "a": { "b": 1 } })).unwrap(), json!({}));
    }

    #[test]
    fn single_condition() {
        assert_eq!(build_filter(Some(&doc! { "v": 42 })).unwrap(), json!({ "v": 42 }));
        assert_eq!(
            build_filter(Some(&doc! { "v": { "$eq": "x" } })).unwrap(),
            json!({ "v": "x" })
        );
    }

    #[test]
    fn several_conditions_are_anded() {
        let oid = ObjectId::parse_str("65a7f0c0e4b0a1b2c3d4e5f6").unwrap();
        let filter = doc! { "a": 1_i64, "b": true, "_id": oid };
        assert_eq!(
            build_filter(Some(&filter)).unwrap(),
            json!({ "$and": [{ "a": 1 }, { "b": true }, { "_id": "65a7f0c0e4b0a1b2c3d4e5f6" }] })
        );
    }

    #[test]
    fn only_exact_scalars_are_pushed() {
        let filter = doc! {
            "d": 1.5,
            "t": DateTime::from_millis(1),
            "n": { "$ne": 1 },
            "arr": [1],
            "x.y": 1,
            "$comment": "c",
        };
        assert_eq!(build_filter(Some(&filter)).unwrap(), json!({}));
    }

    #[test]
    fn invalid_key_is_an_error() {
        let mut filter = Document::new();
        filter.insert("bad\0key", 1);
        assert!(matches!(build_filter(Some(&filter)), Err(QueryError::Path(_))));
    }
}
