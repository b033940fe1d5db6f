use docbridge_query::PathError;
use docbridge_store::{Reason, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Cancelled(#[from] Reason),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        source: StoreError,
    },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("{context}: {source}")]
    Decode {
        context: &'static str,
        source: DecodeError,
    },
    #[error("collection {db}.{collection} does not exist")]
    CollectionNotFound { db: String, collection: String },
    #[error("no execution plan returned")]
    NoPlan,
}

impl QueryError {
    /// Wrap a backend error. Cancellation reported by the backend is
    /// surfaced as [`QueryError::Cancelled`].
    pub(crate) fn store(context: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled(reason) => QueryError::Cancelled(reason),
            source => QueryError::Store { context, source },
        }
    }

    pub(crate) fn decode(context: &'static str, source: impl Into<DecodeError>) -> Self {
        QueryError::Decode {
            context,
            source: source.into(),
        }
    }

    pub(crate) fn not_found(db: &str, collection: &str) -> Self {
        QueryError::CollectionNotFound {
            db: db.to_string(),
            collection: collection.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled(_))
    }
}

/// A stored record or plan could not be turned into a document.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field {field:?} is not described by the schema")]
    UnknownField { field: String },
    #[error("field {field:?}: expected {expected}, found {found}")]
    FieldType {
        field: String,
        expected: String,
        found: &'static str,
    },
    #[error("{0}")]
    Malformed(String),
}
