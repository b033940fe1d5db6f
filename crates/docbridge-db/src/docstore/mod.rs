//! Queries against the schema-enforcing document store.

mod filter;
mod reconciler;
mod tjson;

use bson::{Bson, Document, doc};
use docbridge_query::QueryParams;
use docbridge_store::{Context, DocumentStore, StoreError};

use crate::config::QueryConfig;
use crate::error::{DecodeError, QueryError};
use crate::iterator::{IteratorRegistry, QueryIterator, RecordDecoder};
use crate::sql::convert_json;

pub use filter::build_filter;
pub use reconciler::SchemaReconciler;
pub use tjson::Schema;

use reconciler::SchemaCache;

/// Runs queries against a [`DocumentStore`] session.
///
/// Collection schemas are cached across queries. A record the cached
/// schema cannot describe triggers a refresh from the backend.
#[derive(Debug, Clone, Default)]
pub struct DocStoreExecutor {
    registry: IteratorRegistry,
    config: QueryConfig,
    schemas: SchemaCache,
}

impl DocStoreExecutor {
    pub fn new(registry: IteratorRegistry, config: QueryConfig) -> Self {
        Self {
            registry,
            config,
            schemas: SchemaCache::default(),
        }
    }

    pub fn registry(&self) -> &IteratorRegistry {
        &self.registry
    }

    /// Stream the documents of `qp.collection` that may match `qp.filter`.
    /// A collection that does not exist, including one dropped after its
    /// schema was cached, yields an exhausted iterator.
    ///
    /// `qp.for_update` has no meaning here and is ignored.
    pub fn query_documents<'s, S>(
        &self,
        ctx: &Context,
        store: &'s S,
        qp: &QueryParams,
    ) -> Result<QueryIterator<'s>, QueryError>
    where
        S: DocumentStore + Sync + ?Sized,
    {
        let reconciler = self.reconciler(store, qp);
        let Some(schema) = reconciler.current(ctx)? else {
            tracing::debug!(db = %qp.db, collection = %qp.collection, "collection does not exist");
            return Ok(QueryIterator::empty());
        };

        let filter = build_filter(qp.filter.as_ref())?;
        tracing::debug!(db = %qp.db, collection = %qp.collection, %filter, "reading documents");

        let cursor = match store.read(ctx, &qp.db, &qp.collection, &filter) {
            Ok(cursor) => cursor,
            Err(StoreError::NotFound(what)) => {
                tracing::debug!(
                    db = %qp.db,
                    collection = %qp.collection,
                    %what,
                    "collection dropped since its schema was cached"
                );
                reconciler.forget();
                return Ok(QueryIterator::empty());
            }
            Err(err) => return Err(QueryError::store("reading collection", err)),
        };
        Ok(QueryIterator::new(
            ctx,
            cursor,
            Box::new(TjsonDecoder { schema, reconciler }),
            &self.registry,
            &self.config,
        ))
    }

    /// Describe what [`query_documents`](Self::query_documents) would send
    /// to the backend.
    pub fn explain<S>(&self, ctx: &Context, store: &S, qp: &QueryParams) -> Result<Document, QueryError>
    where
        S: DocumentStore + Sync + ?Sized,
    {
        if self.reconciler(store, qp).fetch(ctx)?.is_none() {
            return Err(QueryError::not_found(&qp.db, &qp.collection));
        }
        let filter = build_filter(qp.filter.as_ref())?;
        let pushdown = filter.as_object().is_some_and(|f| !f.is_empty());
        Ok(doc! {
            "db": qp.db.as_str(),
            "collection": qp.collection.as_str(),
            "filter": convert_json(filter),
            "pushdown": Bson::Boolean(pushdown),
        })
    }

    fn reconciler<'s, S>(&self, store: &'s S, qp: &QueryParams) -> SchemaReconciler<'s, S>
    where
        S: DocumentStore + ?Sized,
    {
        SchemaReconciler::new(store, &qp.db, &qp.collection, self.schemas.clone())
    }
}

struct TjsonDecoder<'s, S: ?Sized> {
    schema: Schema,
    reconciler: SchemaReconciler<'s, S>,
}

impl<S> RecordDecoder for TjsonDecoder<'_, S>
where
    S: DocumentStore + Sync + ?Sized,
{
    fn decode(&mut self, raw: &[u8]) -> Result<Document, DecodeError> {
        self.schema.decode(raw)
    }

    fn refresh(&mut self, ctx: &Context) -> Result<bool, QueryError> {
        self.schema = self.reconciler.refresh(ctx)?;
        Ok(true)
    }
}
