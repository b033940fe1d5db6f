use serde::{Deserialize, Serialize};

/// What an iterator does when the backend rejects a record because a field
/// type differs from the filter value's type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeMismatch {
    /// Drop the offending record and keep pulling.
    #[default]
    Skip,
    /// End iteration at the first mismatch.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub on_type_mismatch: TypeMismatch,
    /// Record where each iterator was created, for leak reports.
    pub capture_backtraces: bool,
    /// Panic when an iterator is dropped without being closed.
    pub panic_on_leak: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            on_type_mismatch: TypeMismatch::default(),
            capture_backtraces: cfg!(debug_assertions),
            panic_on_leak: cfg!(debug_assertions),
        }
    }
}
