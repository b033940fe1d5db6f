use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use docbridge_store::{Context, DocumentStore};

use super::tjson::Schema;
use crate::error::QueryError;

/// Schemas last fetched per `(db, collection)`, shared by an executor and
/// the reconcilers of the iterators it creates.
#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaCache {
    inner: Arc<Mutex<HashMap<(String, String), Schema>>>,
}

impl SchemaCache {
    pub(crate) fn get(&self, db: &str, collection: &str) -> Option<Schema> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
    }

    fn put(&self, db: &str, collection: &str, schema: Schema) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((db.to_string(), collection.to_string()), schema);
    }

    pub(crate) fn forget(&self, db: &str, collection: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(db.to_string(), collection.to_string()));
    }
}

/// Keeps the cached schema of one collection in line with the backend.
pub struct SchemaReconciler<'s, S: ?Sized> {
    store: &'s S,
    db: String,
    collection: String,
    cache: SchemaCache,
}

impl<'s, S> SchemaReconciler<'s, S>
where
    S: DocumentStore + ?Sized,
{
    pub(crate) fn new(store: &'s S, db: &str, collection: &str, cache: SchemaCache) -> Self {
        Self {
            store,
            db: db.to_string(),
            collection: collection.to_string(),
            cache,
        }
    }

    /// The cached schema, fetching it on first use. `None` if the
    /// collection does not exist.
    pub fn current(&self, ctx: &Context) -> Result<Option<Schema>, QueryError> {
        if let Some(schema) = self.cache.get(&self.db, &self.collection) {
            return Ok(Some(schema));
        }
        self.fetch(ctx)
    }

    /// Fetch the authoritative schema, replacing the cached one.
    pub fn refresh(&self, ctx: &Context) -> Result<Schema, QueryError> {
        tracing::warn!(db = %self.db, collection = %self.collection, "refreshing collection schema");
        self.fetch(ctx)?
            .ok_or_else(|| QueryError::not_found(&self.db, &self.collection))
    }

    /// Drop the cached schema, for a collection found to be gone.
    pub(crate) fn forget(&self) {
        self.cache.forget(&self.db, &self.collection);
    }

    /// Ask the backend for the schema, bypassing the cache. `None` if the
    /// collection does not exist.
    pub fn fetch(&self, ctx: &Context) -> Result<Option<Schema>, QueryError> {
        let Some(raw) = self
            .store
            .describe_collection(ctx, &self.db, &self.collection)
            .map_err(|e| QueryError::store("describing collection", e))?
        else {
            self.cache.forget(&self.db, &self.collection);
            return Ok(None);
        };
        let schema =
            Schema::from_json(&raw).map_err(|e| QueryError::decode("parsing collection schema", e))?;
        self.cache.put(&self.db, &self.collection, schema.clone());
        Ok(Some(schema))
    }
}
