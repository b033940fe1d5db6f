mod common;

use std::thread;

use bson::doc;
use common::*;
use docbridge_db::{
    FetchedDocs, IteratorRegistry, QueryConfig, QueryParams, SqlExecutor, consume_values,
    fetch_batches,
};
use docbridge_store::{Context, MemoryDocStore, MemorySql};

fn many(n: i32) -> Vec<bson::Document> {
    (0..n).map(|i| doc! { "_id": i, "even": i % 2 == 0 }).collect()
}

#[test]
fn indices_are_monotonic_from_zero() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(50));
    let exec = sql_executor();
    let tx = sql.begin();
    let qp = QueryParams::new(DB, "many").with_filter(doc! { "even": true });

    let iter = exec
        .query_documents(&Context::background(), &tx, &qp)
        .unwrap();
    let mut expected = 0;
    while let Some((index, doc)) = iter.next().unwrap() {
        assert_eq!(index, expected);
        assert_eq!(doc.get_i32("_id").unwrap(), 2 * expected as i32);
        expected += 1;
    }
    assert_eq!(expected, 25);
    assert!(iter.is_closed());
    exec.registry().assert_all_released();
}

#[test]
fn close_is_idempotent_and_releases_cursor() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(3));
    let exec = sql_executor();
    let tx = sql.begin();

    let iter = exec
        .query_documents(&Context::background(), &tx, &QueryParams::new(DB, "many"))
        .unwrap();
    assert_eq!(sql.open_cursors(), 1);
    assert_eq!(exec.registry().open_count(), 1);
    assert!(iter.next().unwrap().is_some());

    iter.close();
    iter.close();
    assert_eq!(sql.open_cursors(), 0);
    assert_eq!(exec.registry().open_count(), 0);
    assert_eq!(iter.next().unwrap(), None);
}

#[test]
fn concurrent_next_and_close() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(1000));
    let exec = sql_executor();
    let tx = sql.begin();
    let iter = exec
        .query_documents(&Context::background(), &tx, &QueryParams::new(DB, "many"))
        .unwrap();

    let seen = thread::scope(|s| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut seen = Vec::new();
                    while let Some((index, _)) = iter.next().unwrap() {
                        seen.push(index);
                    }
                    seen
                })
            })
            .collect();
        s.spawn(|| iter.close());
        readers
            .into_iter()
            .flat_map(|r| r.join().unwrap())
            .collect::<Vec<_>>()
    });

    let mut sorted = seen.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), seen.len(), "indices are never handed out twice");
    assert!(iter.is_closed());
    iter.close();
    assert_eq!(sql.open_cursors(), 0);
    exec.registry().assert_all_released();
}

#[test]
fn fetch_batches_over_channel() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(10));
    let exec = sql_executor();
    let tx = sql.begin();
    let iter = exec
        .query_documents(&Context::background(), &tx, &QueryParams::new(DB, "many"))
        .unwrap();
    let (sender, receiver) = crossbeam::channel::bounded::<FetchedDocs>(1);

    let batches = thread::scope(|s| {
        s.spawn(move || fetch_batches(iter, 4, &sender));
        receiver.iter().map(|b| b.unwrap().len()).collect::<Vec<_>>()
    });

    assert_eq!(batches, vec![4, 4, 2]);
    assert_eq!(sql.open_cursors(), 0);
    exec.registry().assert_all_released();
}

#[test]
fn dropped_iterator_is_reported() {
    let store = MemoryDocStore::new();
    seed_docstore(&store);
    let registry = IteratorRegistry::new();
    let config = QueryConfig {
        panic_on_leak: false,
        ..config()
    };
    let exec = docbridge_db::DocStoreExecutor::new(registry.clone(), config);

    let iter = exec
        .query_documents(&Context::background(), &store, &QueryParams::new(DB, COLLECTION))
        .unwrap();
    assert!(iter.next().unwrap().is_some());
    drop(iter);

    assert_eq!(store.open_cursors(), 0);
    let leaked = registry.leaked();
    assert_eq!(leaked.len(), 1);
    assert!(leaked[0].created_at.is_some());
    let err = registry.check().unwrap_err();
    assert!(err.open.is_empty());
    assert_eq!(err.leaked, leaked);
}

#[test]
#[should_panic(expected = "dropped without close")]
fn dropped_iterator_panics_by_default_in_tests() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(1));
    let exec = SqlExecutor::new(IteratorRegistry::new(), config());
    let tx = sql.begin();

    let iter = exec
        .query_documents(&Context::background(), &tx, &QueryParams::new(DB, "many"))
        .unwrap();
    drop(iter);
}

#[test]
fn consume_values_closes_after_error() {
    let sql = MemorySql::new();
    seed_sql(&sql, "many", &many(3));
    let exec = sql_executor();
    let tx = sql.begin();
    let (ctx, cancel) = Context::background().with_cancel();
    let iter = exec
        .query_documents(&ctx, &tx, &QueryParams::new(DB, "many"))
        .unwrap();
    cancel.cancel();

    assert!(consume_values(iter).unwrap_err().is_cancelled());
    assert_eq!(sql.open_cursors(), 0);
    exec.registry().assert_all_released();
}
