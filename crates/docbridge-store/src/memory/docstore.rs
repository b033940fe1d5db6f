use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use imbl::{OrdMap, Vector};
use serde_json::Value;

use crate::context::Context;
use crate::error::StoreError;
use crate::store::{Cursor, DocumentStore};

use super::cursor::OpenCursor;
use super::jsonb;

type Collections = OrdMap<(String, String), Collection>;

#[derive(Debug, Clone)]
struct Collection {
    schema: Value,
    records: Vector<Value>,
}

/// In-memory schema-enforcing document backend.
///
/// Records are stored as JSON objects next to the collection's JSON schema.
/// The schema is not validated on insert, which lets tests stage records that
/// only a newer schema can describe.
///
/// Filters support `{}`, `{"field": value}`, `{"field": {"$eq": value}}` and
/// `{"$and": [...]}`. A record whose field holds a different JSON type than
/// the filter value makes the cursor return [`StoreError::InvalidArgument`]
/// for that record; the cursor keeps going on the next call.
pub struct MemoryDocStore {
    collections: ArcSwap<Collections>,
    write_lock: Mutex<()>,
    reads: Mutex<Vec<Value>>,
    open_cursors: Arc<AtomicUsize>,
}

impl Default for MemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self {
            collections: ArcSwap::from_pointee(Collections::new()),
            write_lock: Mutex::new(()),
            reads: Mutex::new(Vec::new()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a collection, or replace the schema of an existing one.
    pub fn create_collection(&self, db: &str, collection: &str, schema: Value) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (db.to_string(), collection.to_string());
        let mut next = (**self.collections.load()).clone();
        match next.get_mut(&key) {
            Some(existing) => existing.schema = schema,
            None => {
                next.insert(
                    key,
                    Collection {
                        schema,
                        records: Vector::new(),
                    },
                );
            }
        }
        self.collections.store(Arc::new(next));
    }

    /// Replace the authoritative schema of an existing collection.
    pub fn set_schema(&self, db: &str, collection: &str, schema: Value) -> Result<(), StoreError> {
        self.update(db, collection, |c| c.schema = schema)
    }

    pub fn insert(&self, db: &str, collection: &str, record: Value) -> Result<(), StoreError> {
        if !record.is_object() {
            return Err(StoreError::Storage("record must be a JSON object".into()));
        }
        self.update(db, collection, |c| c.records.push_back(record))
    }

    pub fn drop_collection(&self, db: &str, collection: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**self.collections.load()).clone();
        next.remove(&(db.to_string(), collection.to_string()));
        self.collections.store(Arc::new(next));
    }

    /// Filters passed to [`read`](DocumentStore::read), oldest first.
    pub fn filters(&self) -> Vec<Value> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of cursors handed out and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::Acquire)
    }

    fn update(
        &self,
        db: &str,
        collection: &str,
        f: impl FnOnce(&mut Collection),
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**self.collections.load()).clone();
        let found = next
            .get_mut(&(db.to_string(), collection.to_string()))
            .ok_or_else(|| not_found(db, collection))?;
        f(found);
        self.collections.store(Arc::new(next));
        Ok(())
    }

    fn get(&self, db: &str, collection: &str) -> Option<Collection> {
        self.collections
            .load()
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
    }
}

impl DocumentStore for MemoryDocStore {
    fn describe_collection(
        &self,
        ctx: &Context,
        db: &str,
        collection: &str,
    ) -> Result<Option<Value>, StoreError> {
        ctx.err()?;
        Ok(self.get(db, collection).map(|c| c.schema))
    }

    fn read<'a>(
        &'a self,
        ctx: &Context,
        db: &str,
        collection: &str,
        filter: &Value,
    ) -> Result<Box<dyn Cursor + 'a>, StoreError> {
        ctx.err()?;
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter.clone());

        let found = self
            .get(db, collection)
            .ok_or_else(|| not_found(db, collection))?;
        let mut conditions = Vec::new();
        collect_conditions(filter, &mut conditions)?;
        tracing::trace!(db, collection, %filter, "memory docstore read");

        Ok(Box::new(DocCursor {
            state: Some((
                found.records.iter().cloned().collect(),
                OpenCursor::new(&self.open_cursors),
            )),
            conditions,
        }))
    }
}

fn not_found(db: &str, collection: &str) -> StoreError {
    StoreError::NotFound(format!("collection {db}.{collection}"))
}

fn collect_conditions(filter: &Value, out: &mut Vec<(String, Value)>) -> Result<(), StoreError> {
    let fields = filter
        .as_object()
        .ok_or_else(|| StoreError::InvalidArgument("filter must be an object".into()))?;

    for (key, value) in fields {
        match (key.as_str(), value) {
            ("$and", Value::Array(items)) => {
                for item in items {
                    collect_conditions(item, out)?;
                }
            }
            (op, _) if op.starts_with('$') => {
                return Err(StoreError::InvalidArgument(format!(
                    "unsupported filter operator {op}"
                )));
            }
            (field, Value::Object(ops)) if ops.keys().any(|k| k.starts_with('$')) => {
                match ops.get("$eq") {
                    Some(v) if ops.len() == 1 => out.push((field.to_string(), v.clone())),
                    _ => {
                        return Err(StoreError::InvalidArgument(format!(
                            "unsupported operators for field {field}"
                        )));
                    }
                }
            }
            (field, v) => out.push((field.to_string(), v.clone())),
        }
    }
    Ok(())
}

struct DocCursor {
    state: Option<(VecDeque<Value>, OpenCursor)>,
    conditions: Vec<(String, Value)>,
}

impl DocCursor {
    fn matches(&self, record: &Value) -> Result<bool, StoreError> {
        for (field, want) in &self.conditions {
            let Some(have) = record.get(field) else {
                return Ok(false);
            };
            if jsonb::kind(have) != jsonb::kind(want) {
                return Err(StoreError::InvalidArgument(format!(
                    "field '{field}' is of type {} but the filter expects {}",
                    jsonb::kind(have),
                    jsonb::kind(want)
                )));
            }
            if !jsonb::equal(have, want) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Cursor for DocCursor {
    fn next(&mut self, ctx: &Context) -> Result<Option<Vec<u8>>, StoreError> {
        ctx.err()?;
        loop {
            let (records, _) = self.state.as_mut().ok_or(StoreError::CursorClosed)?;
            let Some(record) = records.pop_front() else {
                return Ok(None);
            };
            if self.matches(&record)? {
                let raw = serde_json::to_vec(&record)
                    .map_err(|e| StoreError::Storage(e.to_string()))?;
                return Ok(Some(raw));
            }
        }
    }

    fn close(&mut self) {
        if let Some((_, open)) = self.state.take() {
            open.release();
        }
    }
}
