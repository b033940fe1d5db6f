use std::str::FromStr;

use bson::{Bson, Document};
use docbridge_query::{Operator, Path, PathErrorKind, PushdownValue, Scalar, classify};

use super::pjson;
use super::placeholder::Placeholder;
use crate::error::QueryError;

/// SQL conditions to AND together, with the arguments their placeholders
/// bind, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    pub conditions: Vec<String>,
    pub args: Vec<String>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// ` WHERE a AND b`, or nothing when there are no conditions.
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn push_eq(&mut self, p: &mut Placeholder, key: &str, value: Scalar<'_>) {
        let (k, v) = (p.next(), p.next());
        self.conditions.push(format!("_jsonb->{k} @> {v}"));
        self.bind(key, &value.to_bson());
    }

    fn push_ne(&mut self, p: &mut Placeholder, key: &str, value: Scalar<'_>) {
        let (k, v) = (p.next(), p.next());
        let value = value.to_bson();
        // Without the `?` test a missing key makes the whole NOT NULL.
        self.conditions.push(format!(
            "NOT ( _jsonb ? {k} AND _jsonb->{k} @> {v} AND _jsonb->'$s'->'p'->{k}->'t' = '\"{}\"' )",
            pjson::type_of_value(&value)
        ));
        self.bind(key, &value);
    }

    fn bind(&mut self, key: &str, value: &Bson) {
        self.args.push(key.to_string());
        self.args.push(pjson::marshal_single_value(value));
    }
}

/// Compile the part of `filter` the relational backend can evaluate
/// exactly.
///
/// Only top-level keys with scalar values are pushed down, either directly
/// or through `$eq` / `$ne`. Everything else is left for the caller's own
/// filtering pass, so the rows returned are a superset of the matches.
pub fn prepare_where_clause(filter: Option<&Document>) -> Result<Predicate, QueryError> {
    let mut predicate = Predicate::default();
    let Some(filter) = filter else {
        return Ok(predicate);
    };
    let mut p = Placeholder::new();

    for (key, value) in filter {
        // $comment and friends are handled by the caller.
        if key.starts_with('$') {
            continue;
        }

        match Path::from_str(key) {
            Ok(path) if !path.is_single() => {
                tracing::trace!(%path, "nested path is not pushed down");
                continue;
            }
            Ok(_) => {}
            Err(err) if err.kind() == PathErrorKind::EmptyKey => continue,
            Err(err) => return Err(err.into()),
        }

        match value {
            Bson::Document(ops) => {
                for (op, operand) in ops {
                    let Some(op) = Operator::parse(op) else {
                        continue;
                    };
                    let PushdownValue::Scalar(scalar) = classify(operand) else {
                        continue;
                    };
                    match op {
                        Operator::Eq => predicate.push_eq(&mut p, key, scalar),
                        Operator::Ne => predicate.push_ne(&mut p, key, scalar),
                    }
                }
            }
            value => {
                if let PushdownValue::Scalar(scalar) = classify(value) {
                    predicate.push_eq(&mut p, key, scalar);
                }
            }
        }
    }

    Ok(predicate)
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;
    use bson::spec::BinarySubtype;
    use bson::{Binary, DateTime, doc};

    use super::*;

    #[test]
    fn no_filter_matches_all() {
        let predicate = prepare_where_clause(None).unwrap();
        assert!(predicate.is_empty());
        assert_eq!(predicate.where_clause(), "");

        let predicate = prepare_where_clause(Some(&doc! {})).unwrap();
        assert!(predicate.is_empty());
    }

    #[test]
    fn scalar_equality() {
        let predicate = prepare_where_clause(Some(&doc! { "v": 42, "s": "foo" })).unwrap();
        assert_eq!(
            predicate.where_clause(),
            " WHERE _jsonb->$1 @> $2 AND _jsonb->$3 @> $4"
        );
        assert_eq!(predicate.args, vec!["v", "42", "s", r#""foo""#]);
    }

    #[test]
    fn explicit_eq_operator() {
        let predicate = prepare_where_clause(Some(&doc! { "v": { "$eq": true } })).unwrap();
        assert_eq!(predicate.conditions, vec!["_jsonb->$1 @> $2"]);
        assert_eq!(predicate.args, vec!["v", "true"]);
    }

    #[test]
    fn ne_checks_presence_and_type() {
        let predicate = prepare_where_clause(Some(&doc! { "v": { "$ne": 42 } })).unwrap();
        assert_eq!(
            predicate.conditions,
            vec![
                r#"NOT ( _jsonb ? $1 AND _jsonb->$1 @> $2 AND _jsonb->'$s'->'p'->$1->'t' = '"int"' )"#
            ]
        );
        assert_eq!(predicate.args, vec!["v", "42"]);
    }

    #[test]
    fn eq_and_ne_on_one_key() {
        let filter = doc! { "v": { "$eq": "a", "$ne": "b", "$gt": 1 } };
        let predicate = prepare_where_clause(Some(&filter)).unwrap();
        assert_eq!(predicate.conditions.len(), 2);
        assert!(predicate.conditions[1].contains("_jsonb ? $3"));
        assert_eq!(predicate.args, vec!["v", r#""a""#, "v", r#""b""#]);
    }

    #[test]
    fn all_scalar_types_are_pushed() {
        let filter = doc! {
            "d": 1.5,
            "s": "x",
            "o": ObjectId::parse_str("65a7f0c0e4b0a1b2c3d4e5f6").unwrap(),
            "b": false,
            "t": DateTime::from_millis(10),
            "i": 1,
            "l": 2_i64,
        };
        let predicate = prepare_where_clause(Some(&filter)).unwrap();
        assert_eq!(predicate.conditions.len(), 7);
        assert_eq!(predicate.args[5], r#""65a7f0c0e4b0a1b2c3d4e5f6""#);
        assert_eq!(predicate.args[9], "10");
    }

    #[test]
    fn non_scalar_values_are_not_pushed() {
        let bin = Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![1],
        };
        let filter = doc! {
            "doc": { "a": 1 },
            "arr": [1, 2],
            "bin": bin.clone(),
            "null": Bson::Null,
            "eqdoc": { "$eq": { "a": 1 } },
            "eqarr": { "$eq": [1] },
            "nebin": { "$ne": bin },
            "nenull": { "$ne": Bson::Null },
        };
        let predicate = prepare_where_clause(Some(&filter)).unwrap();
        assert!(predicate.is_empty(), "{predicate:?}");
    }

    #[test]
    fn dotted_and_directive_keys_are_skipped() {
        let filter = doc! { "a.b": 1, "$comment": "hi", "": 3, "c": 4 };
        let predicate = prepare_where_clause(Some(&filter)).unwrap();
        assert_eq!(predicate.args, vec!["c", "4"]);
    }

    #[test]
    fn invalid_key_is_an_error() {
        let mut filter = Document::new();
        filter.insert("a\0b", 1);
        let err = prepare_where_clause(Some(&filter)).unwrap_err();
        match err {
            QueryError::Path(e) => assert_eq!(e.kind(), PathErrorKind::InvalidKey),
            other => panic!("expected path error, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "unexpected type of value")]
    fn values_outside_the_model_panic() {
        let _ = prepare_where_clause(Some(&doc! { "v": Bson::MaxKey }));
    }
}
