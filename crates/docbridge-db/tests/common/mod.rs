#![allow(dead_code)]

use bson::{Document, doc};
use docbridge_db::sql::pjson;
use docbridge_db::{DocStoreExecutor, IteratorRegistry, QueryConfig, SqlExecutor};
use docbridge_store::{MemoryDocStore, MemorySql};
use serde_json::{Value, json};

pub const DB: &str = "test";
pub const COLLECTION: &str = "accounts";

pub fn config() -> QueryConfig {
    QueryConfig {
        capture_backtraces: true,
        panic_on_leak: true,
        ..QueryConfig::default()
    }
}

pub fn sql_executor() -> SqlExecutor {
    SqlExecutor::new(IteratorRegistry::new(), config())
}

pub fn docstore_executor() -> DocStoreExecutor {
    DocStoreExecutor::new(IteratorRegistry::new(), config())
}

pub fn accounts() -> Vec<Document> {
    vec![
        doc! { "_id": "acct-1", "name": "Acme Corp", "revenue": 50000.0, "status": "active", "active": true },
        doc! { "_id": "acct-2", "name": "Globex", "revenue": 80000.0, "status": "snoozed", "active": true },
        doc! { "_id": "acct-3", "name": "Initech", "revenue": 12000.0, "status": "rejected", "active": false },
        doc! { "_id": "acct-4", "name": "Umbrella", "revenue": 95000.0, "status": "active", "active": true },
        doc! { "_id": "acct-5", "name": "Stark Industries", "revenue": 200000.0, "status": "active", "active": false },
    ]
}

/// Create `collection` in the relational store and insert `docs`.
pub fn seed_sql(sql: &MemorySql, collection: &str, docs: &[Document]) {
    sql.create_collection(DB, collection);
    for doc in docs {
        sql.insert(DB, collection, pjson::marshal(doc)).unwrap();
    }
}

pub fn accounts_schema() -> Value {
    json!({
        "title": COLLECTION,
        "properties": {
            "_id": { "type": "string" },
            "name": { "type": "string" },
            "revenue": { "type": "number" },
            "status": { "type": "string" },
            "active": { "type": "boolean" }
        }
    })
}

/// Create the accounts collection in the document store with 5 records.
pub fn seed_docstore(store: &MemoryDocStore) {
    store.create_collection(DB, COLLECTION, accounts_schema());
    for doc in accounts() {
        let record: Value = serde_json::to_value(&doc).unwrap();
        store.insert(DB, COLLECTION, record).unwrap();
    }
}

pub fn ids(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d.get_str("_id").unwrap()).collect()
}
