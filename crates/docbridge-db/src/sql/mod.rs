//! Queries against the relational backend, where every collection is a
//! table with a single JSON column `_jsonb`.

mod builder;
mod explain;
pub mod pjson;
mod placeholder;
mod pushdown;

use bson::Document;
use docbridge_query::QueryParams;
use docbridge_store::{Context, SqlTransaction};

use crate::config::QueryConfig;
use crate::error::{DecodeError, QueryError};
use crate::iterator::{IteratorRegistry, QueryIterator, RecordDecoder};

pub use builder::{SelectParams, quote_identifier, sanitize_comment};
pub use explain::convert_json;
pub use placeholder::Placeholder;
pub use pushdown::{Predicate, prepare_where_clause};

/// Result of [`SqlExecutor::execute`].
pub enum Execution<'t> {
    Plan(Document),
    Rows(QueryIterator<'t>),
}

/// Runs queries inside a caller-owned [`SqlTransaction`].
#[derive(Debug, Clone, Default)]
pub struct SqlExecutor {
    registry: IteratorRegistry,
    config: QueryConfig,
}

impl SqlExecutor {
    pub fn new(registry: IteratorRegistry, config: QueryConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &IteratorRegistry {
        &self.registry
    }

    pub fn execute<'t, T>(
        &self,
        ctx: &Context,
        tx: &'t T,
        qp: &QueryParams,
    ) -> Result<Execution<'t>, QueryError>
    where
        T: SqlTransaction + ?Sized,
    {
        if qp.explain {
            self.explain(ctx, tx, qp).map(Execution::Plan)
        } else {
            self.query_documents(ctx, tx, qp).map(Execution::Rows)
        }
    }

    /// Stream the documents of `qp.collection` that may match `qp.filter`.
    ///
    /// A collection that does not exist yields an exhausted iterator. The
    /// transaction is left open.
    pub fn query_documents<'t, T>(
        &self,
        ctx: &Context,
        tx: &'t T,
        qp: &QueryParams,
    ) -> Result<QueryIterator<'t>, QueryError>
    where
        T: SqlTransaction + ?Sized,
    {
        let Some(table) = tx
            .table_name(ctx, &qp.db, &qp.collection)
            .map_err(|e| QueryError::store("resolving table", e))?
        else {
            tracing::debug!(db = %qp.db, collection = %qp.collection, "collection does not exist");
            return Ok(QueryIterator::empty());
        };

        let (sql, args) = SelectParams {
            schema: &qp.db,
            table: &table,
            comment: &qp.comment,
            explain: false,
            filter: qp.filter.as_ref(),
            for_update: qp.for_update,
        }
        .build()?;
        tracing::debug!(%sql, ?args, "querying documents");

        let cursor = tx
            .query(ctx, &sql, &args)
            .map_err(|e| QueryError::store("executing query", e))?;
        Ok(QueryIterator::new(
            ctx,
            cursor,
            Box::new(PjsonDecoder),
            &self.registry,
            &self.config,
        ))
    }

    /// Ask the backend how it would run the query for `qp`.
    pub fn explain<T>(&self, ctx: &Context, tx: &T, qp: &QueryParams) -> Result<Document, QueryError>
    where
        T: SqlTransaction + ?Sized,
    {
        let table = tx
            .table_name(ctx, &qp.db, &qp.collection)
            .map_err(|e| QueryError::store("resolving table", e))?
            .ok_or_else(|| QueryError::not_found(&qp.db, &qp.collection))?;

        let (sql, args) = SelectParams {
            schema: &qp.db,
            table: &table,
            comment: &qp.comment,
            explain: true,
            filter: qp.filter.as_ref(),
            for_update: qp.for_update,
        }
        .build()?;
        tracing::debug!(%sql, ?args, "explaining query");

        let mut cursor = tx
            .query(ctx, &sql, &args)
            .map_err(|e| QueryError::store("executing explain", e))?;
        let row = cursor.next(ctx);
        cursor.close();

        let row = row
            .map_err(|e| QueryError::store("reading explain output", e))?
            .ok_or(QueryError::NoPlan)?;
        explain::first_plan(&row)
    }
}

/// Decodes stored rows. Rows carry their own schema, so there is nothing
/// to refresh.
struct PjsonDecoder;

impl RecordDecoder for PjsonDecoder {
    fn decode(&mut self, raw: &[u8]) -> Result<Document, DecodeError> {
        pjson::unmarshal(raw)
    }

    fn refresh(&mut self, _ctx: &Context) -> Result<bool, QueryError> {
        Ok(false)
    }
}
