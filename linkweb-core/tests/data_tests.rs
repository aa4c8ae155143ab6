// Tests for the result stream stores

use linkweb_core::data::{MemoryResultStore, ResultStore, SqliteResultStore};
use linkweb_core::model::{SessionId, StreamRecord};
use linkweb_scanner::EdgeRecord;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, SqliteResultStore) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("results.db");
    let store = SqliteResultStore::new(&db_path).unwrap();
    (temp_dir, store)
}

fn edge(parent: &str, depth: u32) -> StreamRecord {
    StreamRecord::Edge(EdgeRecord::new(
        parent.to_string(),
        vec![format!("{}/child", parent)],
        Duration::from_millis(depth as u64),
        depth,
    ))
}

fn session(id: &str) -> SessionId {
    SessionId::parse(id).unwrap()
}

fn parents(records: &[StreamRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.as_edge().map(|e| e.parent.clone()))
        .collect()
}

// ============================================================================
// Behaviour shared by every store
// ============================================================================

fn check_append_and_read_range(store: &dyn ResultStore) {
    let s = session("append");
    assert_eq!(store.append(&s, &edge("http://a.com", 3)).unwrap(), 1);
    assert_eq!(store.append(&s, &edge("http://b.com", 2)).unwrap(), 2);
    assert_eq!(store.append(&s, &edge("http://c.com", 2)).unwrap(), 3);

    assert_eq!(store.len(&s).unwrap(), 3);
    assert_eq!(
        parents(&store.read_range(&s, 0).unwrap()),
        vec!["http://a.com", "http://b.com", "http://c.com"]
    );
    assert_eq!(parents(&store.read_range(&s, 2).unwrap()), vec!["http://c.com"]);
    assert!(store.read_range(&s, 3).unwrap().is_empty());
    assert!(store.read_range(&s, 100).unwrap().is_empty());
}

fn check_sessions_are_isolated(store: &dyn ResultStore) {
    let first = session("first");
    let second = session("second");
    store.append(&first, &edge("http://a.com", 1)).unwrap();
    store.append(&second, &edge("http://z.com", 1)).unwrap();
    store.append(&second, &StreamRecord::done()).unwrap();

    assert_eq!(parents(&store.read_range(&first, 0).unwrap()), vec!["http://a.com"]);
    assert_eq!(store.len(&second).unwrap(), 2);
    assert!(store.read_range(&session("unknown"), 0).unwrap().is_empty());
}

fn check_prefix_is_immutable(store: &dyn ResultStore) {
    let s = session("prefix");
    store.append(&s, &edge("http://a.com", 2)).unwrap();
    store.append(&s, &edge("http://b.com", 1)).unwrap();
    let before = store.read_range(&s, 0).unwrap();

    store.append(&s, &edge("http://c.com", 1)).unwrap();
    store.append(&s, &StreamRecord::done()).unwrap();
    let after = store.read_range(&s, 0).unwrap();

    assert_eq!(&after[..before.len()], &before[..]);
}

fn check_sentinel_is_last_from_every_index(store: &dyn ResultStore) {
    let s = session("sentinel");
    for i in 0..4 {
        store.append(&s, &edge(&format!("http://site{}.com", i), 2)).unwrap();
    }
    store.append(&s, &StreamRecord::done()).unwrap();

    for start in 0..5 {
        let records = store.read_range(&s, start).unwrap();
        assert!(records.last().unwrap().is_done());
        assert_eq!(records.iter().filter(|r| r.is_done()).count(), 1);
    }
}

fn check_expired_stream_reads_empty(store: &dyn ResultStore) {
    let s = session("expired");
    store.append(&s, &edge("http://a.com", 1)).unwrap();
    store.set_expiry(&s, Duration::ZERO).unwrap();

    assert!(store.read_range(&s, 0).unwrap().is_empty());
    assert_eq!(store.len(&s).unwrap(), 0);

    // Writing again starts a new stream from index 0
    assert_eq!(store.append(&s, &edge("http://b.com", 1)).unwrap(), 1);
    assert_eq!(parents(&store.read_range(&s, 0).unwrap()), vec!["http://b.com"]);
}

fn check_expiry_set_before_first_record(store: &dyn ResultStore) {
    let live = session("early-live");
    store.set_expiry(&live, Duration::from_secs(60)).unwrap();
    assert_eq!(store.len(&live).unwrap(), 0);
    store.append(&live, &edge("http://a.com", 1)).unwrap();
    assert_eq!(store.len(&live).unwrap(), 1);

    let doomed = session("early-doomed");
    store.set_expiry(&doomed, Duration::ZERO).unwrap();
    assert_eq!(store.purge_expired().unwrap(), 1);
}

fn check_purge_removes_only_expired(store: &dyn ResultStore) {
    let keep = session("keep");
    let drop_a = session("drop-a");
    let drop_b = session("drop-b");
    let forever = session("forever");

    for s in [&keep, &drop_a, &drop_b, &forever] {
        store.append(s, &edge("http://a.com", 1)).unwrap();
    }
    store.set_expiry(&keep, Duration::from_secs(60)).unwrap();
    store.set_expiry(&drop_a, Duration::ZERO).unwrap();
    store.set_expiry(&drop_b, Duration::ZERO).unwrap();

    assert_eq!(store.purge_expired().unwrap(), 2);
    assert_eq!(store.len(&keep).unwrap(), 1);
    assert_eq!(store.len(&forever).unwrap(), 1);
    assert_eq!(store.purge_expired().unwrap(), 0);
}

fn check_refresh_does_not_revive_expired_stream(store: &dyn ResultStore) {
    let s = session("refresh");
    store.append(&s, &edge("http://a.com", 1)).unwrap();
    store.set_expiry(&s, Duration::from_secs(60)).unwrap();
    store.set_expiry(&s, Duration::from_secs(120)).unwrap();
    assert_eq!(store.len(&s).unwrap(), 1);

    store.set_expiry(&s, Duration::ZERO).unwrap();
    store.set_expiry(&s, Duration::from_secs(60)).unwrap();
    assert_eq!(store.len(&s).unwrap(), 0);
}

fn run_contract(make: impl Fn() -> Box<dyn ResultStore>) {
    check_append_and_read_range(make().as_ref());
    check_sessions_are_isolated(make().as_ref());
    check_prefix_is_immutable(make().as_ref());
    check_sentinel_is_last_from_every_index(make().as_ref());
    check_expired_stream_reads_empty(make().as_ref());
    check_expiry_set_before_first_record(make().as_ref());
    check_purge_removes_only_expired(make().as_ref());
    check_refresh_does_not_revive_expired_stream(make().as_ref());
}

#[test]
fn test_memory_store_contract() {
    run_contract(|| Box::new(MemoryResultStore::new()));
}

#[test]
fn test_sqlite_in_memory_store_contract() {
    run_contract(|| Box::new(SqliteResultStore::in_memory().unwrap()));
}

// ============================================================================
// SQLite specifics
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("results.db");

    assert!(!SqliteResultStore::exists(&db_path));
    let store = SqliteResultStore::new(&db_path);
    assert!(store.is_ok());
    assert!(SqliteResultStore::exists(&db_path));
}

#[test]
fn test_streams_survive_reopen() {
    let (temp_dir, store) = create_test_db();
    let s = session("durable");
    store.append(&s, &edge("http://a.com", 2)).unwrap();
    store.append(&s, &StreamRecord::done()).unwrap();
    drop(store);

    let reopened = SqliteResultStore::new(&temp_dir.path().join("results.db")).unwrap();
    let records = reopened.read_range(&s, 0).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], edge("http://a.com", 2));
    assert!(records[1].is_done());
}

#[test]
fn test_concurrent_appends_keep_dense_indices() {
    let (_temp_dir, store) = create_test_db();
    let store = std::sync::Arc::new(store);
    let s = session("concurrent");

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            let s = s.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    store
                        .append(&s, &edge(&format!("http://t{}-{}.com", t, i), 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(&s).unwrap(), 200);
    assert_eq!(store.read_range(&s, 150).unwrap().len(), 50);
}
