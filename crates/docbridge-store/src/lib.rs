mod context;
mod error;
mod store;

pub use context::{Canceller, Context, Reason};
pub use error::StoreError;
pub use store::{Cursor, DocumentStore, SqlTransaction};

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::{LoggedQuery, MemoryDocStore, MemorySql, MemorySqlTransaction};
