use crate::context::Reason;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend refused to evaluate the request, typically because a
    /// filter value's type does not match the stored field's type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Cancelled(#[from] Reason),
    /// The collection or table named in the request does not exist.
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("cursor already closed")]
    CursorClosed,
    #[error("storage error: {0}")]
    Storage(String),
}
