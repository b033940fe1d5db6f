use bson::Document;
use serde::{Deserialize, Serialize};

/// Everything an executor needs to run one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Filter for possible pushdown; backends may apply part of it or none.
    /// Callers must still filter the returned documents themselves.
    #[serde(default)]
    pub filter: Option<Document>,
    pub db: String,
    pub collection: String,
    /// Free-text comment attached to the backend query.
    #[serde(default)]
    pub comment: String,
    /// Ask for the backend's execution plan instead of documents.
    #[serde(default)]
    pub explain: bool,
    /// Lock the returned rows for the rest of the transaction.
    #[serde(default)]
    pub for_update: bool,
}

impl QueryParams {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_for_update(mut self, for_update: bool) -> Self {
        self.for_update = for_update;
        self
    }
}
