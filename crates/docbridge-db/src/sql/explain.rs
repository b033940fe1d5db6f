use bson::{Bson, Document};
use serde_json::Value;

use crate::error::QueryError;

/// Convert untyped JSON into the document model. Every number becomes a
/// double.
pub fn convert_json(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(n) => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(items.into_iter().map(convert_json).collect()),
        Value::Object(map) => Bson::Document(
            map.into_iter()
                .map(|(k, v)| (k, convert_json(v)))
                .collect(),
        ),
    }
}

/// Extract the first plan from the JSON array an `EXPLAIN (FORMAT JSON)`
/// row holds.
pub(crate) fn first_plan(raw: &[u8]) -> Result<Document, QueryError> {
    let plans: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(raw)
        .map_err(|e| QueryError::decode("parsing explain output", e))?;
    let plan = plans.into_iter().next().ok_or(QueryError::NoPlan)?;
    Ok(plan.into_iter().map(|(k, v)| (k, convert_json(v))).collect())
}
