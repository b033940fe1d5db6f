mod cursor;
mod docstore;
mod jsonb;
mod sql;

pub use docstore::MemoryDocStore;
pub use sql::{LoggedQuery, MemorySql, MemorySqlTransaction};
