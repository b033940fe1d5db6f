use bson::Document;

use super::pushdown::prepare_where_clause;
use crate::error::QueryError;

const EXPLAIN_PREFIX: &str = "EXPLAIN (VERBOSE true, FORMAT JSON) ";

/// Inputs for one `SELECT` over a collection's table.
#[derive(Debug, Clone, Copy)]
pub struct SelectParams<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub comment: &'a str,
    pub explain: bool,
    pub filter: Option<&'a Document>,
    pub for_update: bool,
}

impl SelectParams<'_> {
    /// Assemble the statement text and its positional arguments.
    pub fn build(&self) -> Result<(String, Vec<String>), QueryError> {
        let mut sql = String::new();
        if self.explain {
            sql.push_str(EXPLAIN_PREFIX);
        }
        sql.push_str("SELECT _jsonb ");
        if !self.comment.is_empty() {
            sql.push_str("/* ");
            sql.push_str(&sanitize_comment(self.comment));
            sql.push_str(" */ ");
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(self.schema));
        sql.push('.');
        sql.push_str(&quote_identifier(self.table));

        let predicate = prepare_where_clause(self.filter)?;
        sql.push_str(&predicate.where_clause());

        if self.for_update {
            sql.push_str(" FOR UPDATE");
        }
        Ok((sql, predicate.args))
    }
}

/// Break up sequences that would open or close a block comment.
pub fn sanitize_comment(comment: &str) -> String {
    comment.replace("/*", "/ *").replace("*/", "* /")
}

/// Quote an SQL identifier: wrap in double quotes, double embedded quotes
/// and drop NUL bytes.
pub fn quote_identifier(ident: &str) -> String {
    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars() {
        match c {
            '\0' => {}
            '"' => quoted.push_str("\"\""),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
