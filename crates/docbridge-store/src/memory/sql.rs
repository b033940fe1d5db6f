use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use imbl::{OrdMap, Vector};
use serde_json::{Value, json};

use crate::context::Context;
use crate::error::StoreError;
use crate::store::{Cursor, SqlTransaction};

use super::cursor::{OpenCursor, RowCursor};
use super::jsonb;

type Catalog = OrdMap<(String, String), Table>;

#[derive(Debug, Clone)]
struct Table {
    name: String,
    rows: Vector<Vec<u8>>,
}

/// A statement received by [`MemorySql`], kept for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedQuery {
    pub sql: String,
    pub args: Vec<String>,
}

/// In-memory relational backend.
///
/// Each collection is a table with a single `_jsonb` column. Queries are
/// evaluated against a snapshot taken when the transaction began. Only the
/// statement shape produced by the docbridge query builder is understood:
///
/// ```text
/// [EXPLAIN (...)] SELECT _jsonb [/* ... */] FROM "schema"."table"
///     [WHERE <predicate> [AND <predicate>]...] [FOR UPDATE]
/// ```
///
/// where predicates combine `_jsonb->key` paths with `@>`, `?`, `=` and `NOT`.
pub struct MemorySql {
    catalog: ArcSwap<Catalog>,
    write_lock: Mutex<()>,
    log: Mutex<Vec<LoggedQuery>>,
    open_cursors: Arc<AtomicUsize>,
}

impl Default for MemorySql {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySql {
    pub fn new() -> Self {
        Self {
            catalog: ArcSwap::from_pointee(Catalog::new()),
            write_lock: Mutex::new(()),
            log: Mutex::new(Vec::new()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create the table backing `schema.collection` and return its name.
    /// Idempotent.
    pub fn create_collection(&self, schema: &str, collection: &str) -> String {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (schema.to_string(), collection.to_string());
        let catalog = self.catalog.load();
        if let Some(table) = catalog.get(&key) {
            return table.name.clone();
        }
        let name = table_name_for(collection);
        tracing::debug!(schema, collection, table = %name, "creating table");
        let mut next = (**catalog).clone();
        next.insert(
            key,
            Table {
                name: name.clone(),
                rows: Vector::new(),
            },
        );
        self.catalog.store(Arc::new(next));
        name
    }

    /// Append a stored row (the `_jsonb` column value).
    pub fn insert(
        &self,
        schema: &str,
        collection: &str,
        row: impl Into<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (schema.to_string(), collection.to_string());
        let mut next = (**self.catalog.load()).clone();
        let table = next.get_mut(&key).ok_or_else(|| {
            StoreError::NotFound(format!("relation {schema}.{collection}"))
        })?;
        table.rows.push_back(row.into());
        self.catalog.store(Arc::new(next));
        Ok(())
    }

    pub fn begin(&self) -> MemorySqlTransaction<'_> {
        MemorySqlTransaction {
            store: self,
            snapshot: self.catalog.load_full(),
        }
    }

    /// Every statement executed so far, oldest first.
    pub fn queries(&self) -> Vec<LoggedQuery> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of cursors handed out and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::Acquire)
    }
}

/// Snapshot-isolated transaction on a [`MemorySql`].
pub struct MemorySqlTransaction<'a> {
    store: &'a MemorySql,
    snapshot: Arc<Catalog>,
}

impl SqlTransaction for MemorySqlTransaction<'_> {
    fn table_name(
        &self,
        ctx: &Context,
        schema: &str,
        collection: &str,
    ) -> Result<Option<String>, StoreError> {
        ctx.err()?;
        let key = (schema.to_string(), collection.to_string());
        Ok(self.snapshot.get(&key).map(|t| t.name.clone()))
    }

    fn query<'a>(
        &'a self,
        ctx: &Context,
        sql: &str,
        args: &[String],
    ) -> Result<Box<dyn Cursor + 'a>, StoreError> {
        ctx.err()?;
        self.store
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LoggedQuery {
                sql: sql.to_string(),
                args: args.to_vec(),
            });

        tracing::trace!(%sql, ?args, "memory sql query");
        let select = Parser::new(tokenize(sql)?).statement()?;
        let table = self
            .snapshot
            .iter()
            .find(|((schema, _), t)| *schema == select.schema && t.name == select.table)
            .map(|(_, t)| t)
            .ok_or_else(|| {
                StoreError::NotFound(format!("relation \"{}.{}\"", select.schema, select.table))
            })?;

        let rows = if select.explain {
            vec![explain_plan(sql, &select).to_string().into_bytes()]
        } else {
            let mut rows = Vec::new();
            for raw in table.rows.iter() {
                let matched = match &select.filter {
                    None => true,
                    Some(expr) => {
                        let doc: Value = serde_json::from_slice(raw)
                            .map_err(|e| StoreError::Storage(format!("corrupt row: {e}")))?;
                        eval(expr, &doc, args)? == Some(true)
                    }
                };
                if matched {
                    rows.push(raw.clone());
                }
            }
            rows
        };

        Ok(Box::new(RowCursor::new(
            rows,
            OpenCursor::new(&self.store.open_cursors),
        )))
    }
}

fn table_name_for(collection: &str) -> String {
    // FNV-1a keeps mangled names stable across runs.
    let hash = collection.bytes().fold(0x811c_9dc5_u32, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    format!("{}_{hash:08x}", collection.to_lowercase())
}

fn explain_plan(sql: &str, select: &Select) -> Value {
    let mut scan = json!({
        "Node Type": "Seq Scan",
        "Parallel Aware": false,
        "Relation Name": select.table,
        "Schema": select.schema,
        "Alias": select.table,
        "Output": ["_jsonb"],
    });
    if let Some((_, filter)) = sql.split_once(" WHERE ") {
        let filter = filter.trim_end_matches(" FOR UPDATE");
        scan["Filter"] = Value::String(filter.to_string());
    }
    let plan = if select.for_update {
        json!({ "Node Type": "LockRows", "Plans": [scan] })
    } else {
        scan
    };
    json!([{ "Plan": plan }])
}

// ── Lexer ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Ident(String),
    Literal(String),
    Param(usize),
    Arrow,
    Contains,
    Question,
    Equals,
    LParen,
    RParen,
    Comma,
    Dot,
}

fn syntax(msg: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(format!("syntax error: {msg}"))
}

fn tokenize(sql: &str) -> Result<Vec<Token>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                loop {
                    match chars.next() {
                        Some('/') if prev == '*' => break,
                        Some(c) => prev = c,
                        None => return Err(syntax("unterminated comment")),
                    }
                }
            }
            '"' | '\'' => {
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c && chars.peek() == Some(&c) => {
                            chars.next();
                            text.push(c);
                        }
                        Some(q) if q == c => break,
                        Some(other) => text.push(other),
                        None => return Err(syntax("unterminated quoted string")),
                    }
                }
                tokens.push(if c == '"' {
                    Token::Ident(text)
                } else {
                    Token::Literal(text)
                });
            }
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                let n = digits
                    .parse()
                    .map_err(|_| syntax("expected parameter number after '$'"))?;
                tokens.push(Token::Param(n));
            }
            '-' if chars.peek() == Some(&'>') => {
                chars.next();
                tokens.push(Token::Arrow);
            }
            '@' if chars.peek() == Some(&'>') => {
                chars.next();
                tokens.push(Token::Contains);
            }
            '?' => tokens.push(Token::Question),
            '=' => tokens.push(Token::Equals),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '.' => tokens.push(Token::Dot),
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = c.to_string();
                while let Some(n) = chars.peek().filter(|n| n.is_alphanumeric() || **n == '_') {
                    word.push(*n);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(syntax(format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

// ── Parser ──────────────────────────────────────────────────

#[derive(Debug)]
struct Select {
    explain: bool,
    schema: String,
    table: String,
    filter: Option<Expr>,
    for_update: bool,
}

#[derive(Debug)]
enum Expr {
    And(Vec<Expr>),
    Not(Box<Expr>),
    Contains(Operand, Operand),
    HasKey(Operand, Operand),
    Equals(Operand, Operand),
}

#[derive(Debug)]
enum Operand {
    /// `_jsonb` followed by zero or more `->` field accesses.
    Column(Vec<Operand>),
    Param(usize),
    Literal(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn statement(mut self) -> Result<Select, StoreError> {
        let explain = self.keyword("EXPLAIN");
        if explain {
            self.expect(&Token::LParen)?;
            while self.peek() != Some(&Token::RParen) {
                self.bump().ok_or_else(|| syntax("unterminated EXPLAIN options"))?;
            }
            self.expect(&Token::RParen)?;
        }

        self.expect_keyword("SELECT")?;
        match self.bump() {
            Some(Token::Word(w)) if w == "_jsonb" => {}
            other => return Err(syntax(format!("unsupported projection {other:?}"))),
        }
        self.expect_keyword("FROM")?;
        let schema = self.ident()?;
        self.expect(&Token::Dot)?;
        let table = self.ident()?;

        let filter = if self.keyword("WHERE") {
            Some(self.conjunction()?)
        } else {
            None
        };

        let for_update = self.keyword("FOR");
        if for_update {
            self.expect_keyword("UPDATE")?;
        }

        if let Some(tok) = self.peek() {
            return Err(syntax(format!("unexpected trailing token {tok:?}")));
        }

        Ok(Select {
            explain,
            schema,
            table,
            filter,
            for_update,
        })
    }

    fn conjunction(&mut self) -> Result<Expr, StoreError> {
        let mut terms = vec![self.unary()?];
        while self.keyword("AND") {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Expr, StoreError> {
        if self.keyword("NOT") {
            self.expect(&Token::LParen)?;
            let inner = self.conjunction()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.conjunction()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        let left = self.operand()?;
        let op = self.bump().ok_or_else(|| syntax("expected operator"))?;
        let right = self.operand()?;
        match op {
            Token::Contains => Ok(Expr::Contains(left, right)),
            Token::Question => Ok(Expr::HasKey(left, right)),
            Token::Equals => Ok(Expr::Equals(left, right)),
            other => Err(syntax(format!("unsupported operator {other:?}"))),
        }
    }

    fn operand(&mut self) -> Result<Operand, StoreError> {
        match self.bump() {
            Some(Token::Word(w)) if w == "_jsonb" => {
                let mut path = Vec::new();
                while self.peek() == Some(&Token::Arrow) {
                    self.pos += 1;
                    match self.bump() {
                        Some(Token::Param(n)) => path.push(Operand::Param(n)),
                        Some(Token::Literal(s)) => path.push(Operand::Literal(s)),
                        other => return Err(syntax(format!("bad field accessor {other:?}"))),
                    }
                }
                Ok(Operand::Column(path))
            }
            Some(Token::Param(n)) => Ok(Operand::Param(n)),
            Some(Token::Literal(s)) => Ok(Operand::Literal(s)),
            other => Err(syntax(format!("unexpected operand {other:?}"))),
        }
    }

    fn ident(&mut self) -> Result<String, StoreError> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(syntax(format!("expected quoted identifier, got {other:?}"))),
        }
    }

    fn keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), StoreError> {
        if self.keyword(kw) {
            Ok(())
        } else {
            Err(syntax(format!("expected {kw}")))
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), StoreError> {
        match self.bump() {
            Some(ref t) if t == token => Ok(()),
            other => Err(syntax(format!("expected {token:?}, got {other:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }
}

// ── Evaluation ──────────────────────────────────────────────

/// Three-valued evaluation: `None` is SQL NULL.
fn eval(expr: &Expr, row: &Value, args: &[String]) -> Result<Option<bool>, StoreError> {
    match expr {
        Expr::And(terms) => {
            let mut result = Some(true);
            for term in terms {
                match eval(term, row, args)? {
                    Some(false) => return Ok(Some(false)),
                    None => result = None,
                    Some(true) => {}
                }
            }
            Ok(result)
        }
        Expr::Not(inner) => Ok(eval(inner, row, args)?.map(|b| !b)),
        Expr::Contains(left, right) => {
            let left = json_operand(left, row, args)?;
            let right = json_operand(right, row, args)?;
            Ok(left.zip(right).map(|(l, r)| jsonb::contains(&l, &r)))
        }
        Expr::Equals(left, right) => {
            let left = json_operand(left, row, args)?;
            let right = json_operand(right, row, args)?;
            Ok(left.zip(right).map(|(l, r)| jsonb::equal(&l, &r)))
        }
        Expr::HasKey(left, right) => {
            let left = json_operand(left, row, args)?;
            let key = text_operand(right, args)?;
            Ok(left.map(|value| match value.as_ref() {
                Value::Object(map) => map.contains_key(key),
                Value::Array(items) => items.iter().any(|v| v.as_str() == Some(key)),
                _ => false,
            }))
        }
    }
}

fn json_operand<'a>(
    operand: &'a Operand,
    row: &'a Value,
    args: &'a [String],
) -> Result<Option<Cow<'a, Value>>, StoreError> {
    match operand {
        Operand::Column(path) => {
            let mut current = Some(row);
            for key in path {
                let key = text_operand(key, args)?;
                current = current.and_then(|v| v.get(key));
            }
            Ok(current.map(Cow::Borrowed))
        }
        Operand::Param(_) | Operand::Literal(_) => {
            let text = text_operand(operand, args)?;
            let value = serde_json::from_str(text).map_err(|e| {
                StoreError::Storage(format!("invalid input syntax for type json: {e}"))
            })?;
            Ok(Some(Cow::Owned(value)))
        }
    }
}

fn text_operand<'a>(operand: &'a Operand, args: &'a [String]) -> Result<&'a str, StoreError> {
    match operand {
        Operand::Param(n) => n
            .checked_sub(1)
            .and_then(|i| args.get(i))
            .map(String::as_str)
            .ok_or_else(|| StoreError::Storage(format!("no argument bound to ${n}"))),
        Operand::Literal(s) => Ok(s.as_str()),
        Operand::Column(_) => Err(syntax("column used where text is expected")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(sql: &str) -> Expr {
        let select = Parser::new(tokenize(sql).unwrap()).statement().unwrap();
        select.filter.unwrap()
    }

    #[test]
    fn parses_full_statement() {
        let sql = r#"EXPLAIN (VERBOSE true, FORMAT JSON) SELECT _jsonb /* it's a "comment" */  FROM "db"."t""x" WHERE _jsonb->$1 @> $2 FOR UPDATE"#;
        let select = Parser::new(tokenize(sql).unwrap()).statement().unwrap();
        assert!(select.explain);
        assert_eq!(select.schema, "db");
        assert_eq!(select.table, "t\"x");
        assert!(select.filter.is_some());
        assert!(select.for_update);
    }

    #[test]
    fn rejects_unknown_projection() {
        let err = Parser::new(tokenize(r#"SELECT name FROM "a"."b""#).unwrap())
            .statement()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported projection"), "{err}");
    }

    #[test]
    fn rejects_star_while_tokenizing() {
        let err = tokenize(r#"SELECT * FROM "a"."b""#).unwrap_err();
        assert!(err.to_string().contains("unexpected character '*'"), "{err}");
    }

    #[test]
    fn not_over_missing_key_is_true() {
        let expr = filter(
            r#"SELECT _jsonb FROM "a"."b" WHERE NOT ( _jsonb ? $1 AND _jsonb->$1 @> $2 )"#,
        );
        let args = vec!["v".to_string(), "42".to_string()];
        assert_eq!(eval(&expr, &json!({"w": 1}), &args).unwrap(), Some(true));
        assert_eq!(eval(&expr, &json!({"v": 42}), &args).unwrap(), Some(false));
    }

    #[test]
    fn containment_on_missing_key_is_null() {
        let expr = filter(r#"SELECT _jsonb FROM "a"."b" WHERE _jsonb->$1 @> $2"#);
        let args = vec!["v".to_string(), "1".to_string()];
        assert_eq!(eval(&expr, &json!({}), &args).unwrap(), None);
    }

    #[test]
    fn literal_path_segments() {
        let expr = filter(
            r#"SELECT _jsonb FROM "a"."b" WHERE _jsonb->'$s'->'p'->$1->'t' = '"int"'"#,
        );
        let args = vec!["v".to_string()];
        let doc = json!({"$s": {"p": {"v": {"t": "int"}}}, "v": 1});
        assert_eq!(eval(&expr, &doc, &args).unwrap(), Some(true));
    }

    #[test]
    fn missing_argument_is_an_error() {
        let expr = filter(r#"SELECT _jsonb FROM "a"."b" WHERE _jsonb->$1 @> $2"#);
        assert!(eval(&expr, &json!({}), &["v".to_string()]).is_err());
    }
}
