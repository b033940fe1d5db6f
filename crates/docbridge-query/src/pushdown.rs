//! Which filter values can be compared by a backend without changing
//! query semantics.

use bson::oid::ObjectId;
use bson::{Bson, DateTime};

/// A value whose equality a backend reproduces exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar<'a> {
    Double(f64),
    String(&'a str),
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(DateTime),
    Int32(i32),
    Int64(i64),
}

impl Scalar<'_> {
    pub fn to_bson(self) -> Bson {
        match self {
            Scalar::Double(f) => Bson::Double(f),
            Scalar::String(s) => Bson::String(s.to_string()),
            Scalar::ObjectId(oid) => Bson::ObjectId(oid),
            Scalar::Boolean(b) => Bson::Boolean(b),
            Scalar::DateTime(dt) => Bson::DateTime(dt),
            Scalar::Int32(n) => Bson::Int32(n),
            Scalar::Int64(n) => Bson::Int64(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushdownValue<'a> {
    Scalar(Scalar<'a>),
    /// Part of the document model, but backend comparison would not match
    /// query semantics: documents, arrays, binary, null, regular
    /// expressions and internal timestamps.
    Unsupported,
}

/// Classify a filter value for pushdown.
///
/// # Panics
///
/// Panics on values outside the document model (decimal, symbol,
/// JavaScript code, DB pointer, min/max key, undefined). A correct request
/// decoder never produces them.
pub fn classify(value: &Bson) -> PushdownValue<'_> {
    match value {
        Bson::Double(f) => PushdownValue::Scalar(Scalar::Double(*f)),
        Bson::String(s) => PushdownValue::Scalar(Scalar::String(s)),
        Bson::ObjectId(oid) => PushdownValue::Scalar(Scalar::ObjectId(*oid)),
        Bson::Boolean(b) => PushdownValue::Scalar(Scalar::Boolean(*b)),
        Bson::DateTime(dt) => PushdownValue::Scalar(Scalar::DateTime(*dt)),
        Bson::Int32(n) => PushdownValue::Scalar(Scalar::Int32(*n)),
        Bson::Int64(n) => PushdownValue::Scalar(Scalar::Int64(*n)),

        Bson::Document(_)
        | Bson::Array(_)
        | Bson::Binary(_)
        | Bson::Null
        | Bson::RegularExpression(_)
        | Bson::Timestamp(_) => PushdownValue::Unsupported,

        Bson::Decimal128(_)
        | Bson::Symbol(_)
        | Bson::JavaScriptCode(_)
        | Bson::JavaScriptCodeWithScope(_)
        | Bson::DbPointer(_)
        | Bson::MaxKey
        | Bson::MinKey
        | Bson::Undefined => panic!("unexpected type of value: {value:?}"),
    }
}
