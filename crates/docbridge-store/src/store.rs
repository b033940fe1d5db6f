use crate::context::Context;
use crate::error::StoreError;

/// A backend result stream.
///
/// Yields raw encoded records (JSON bytes for both backends). The owner must
/// call [`close`](Cursor::close) to release backend resources; closing twice
/// is allowed.
pub trait Cursor: Send {
    /// Advance to the next record. `Ok(None)` means the stream is exhausted.
    fn next(&mut self, ctx: &Context) -> Result<Option<Vec<u8>>, StoreError>;

    fn close(&mut self);
}

/// An open transaction on the relational backend.
///
/// Owned by the caller: nothing in this workspace commits, rolls back or
/// closes it.
pub trait SqlTransaction {
    /// Resolve the table that stores `schema.collection`.
    ///
    /// Returns `None` if the collection does not exist.
    fn table_name(
        &self,
        ctx: &Context,
        schema: &str,
        collection: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Execute `sql` with positional text arguments (`$1` binds `args[0]`).
    /// Every row is the single projected column.
    fn query<'a>(
        &'a self,
        ctx: &Context,
        sql: &str,
        args: &[String],
    ) -> Result<Box<dyn Cursor + 'a>, StoreError>;
}

/// A session on the schema-enforcing document backend.
pub trait DocumentStore {
    /// Fetch the authoritative JSON schema of a collection, `None` if the
    /// collection does not exist.
    fn describe_collection(
        &self,
        ctx: &Context,
        db: &str,
        collection: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// Read the documents matching a backend-native JSON filter. An empty
    /// object matches everything.
    fn read<'a>(
        &'a self,
        ctx: &Context,
        db: &str,
        collection: &str,
        filter: &serde_json::Value,
    ) -> Result<Box<dyn Cursor + 'a>, StoreError>;
}
