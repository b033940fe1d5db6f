mod config;
pub mod docstore;
mod error;
mod iterator;
pub mod sql;

pub use bson::{Bson, Document};
pub use config::{QueryConfig, TypeMismatch};
pub use docbridge_query::QueryParams;
pub use docstore::DocStoreExecutor;
pub use error::{DecodeError, QueryError};
pub use iterator::{
    FetchedDocs, IteratorRegistry, LeakError, LeakReport, QueryIterator, RecordDecoder,
    consume_values, fetch_batches,
};
pub use sql::{Execution, SqlExecutor};
