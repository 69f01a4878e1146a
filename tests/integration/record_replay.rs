//! Record then replay through the reference adapters.
//!
//! Each test records against a fake dependency and then replays the same
//! calls with the dependency unreachable.

use std::sync::Arc;

use super::common::determinism::{pinned_manager, TraceIdSequence};
use super::common::fixtures::{EventLog, FakeCacheServer, FakeHttpService, TestDirs};
use replaykit::adapters::{
    CacheCodec, CacheCommand, CacheReply, HttpCodec, HttpRequestData, SqlCodec, SqlExecResult,
    SqlQuery, SqlRows, SqlValue,
};
use replaykit::intercept::{EVENT_RECORDING, EVENT_REPLAYING, EVENT_REPLAY_MISS};
use replaykit::{
    CallError, EngineError, ExternalCall, Intercepted, MemoryStorage, Mode, SqliteOptions,
    SqliteStorage, Storage,
};

/// Scenario A: value written to the memory store reads back unchanged
#[test]
fn test_memory_store_roundtrip() {
    let storage = MemoryStorage::new();
    storage.put("k1", b"hello").unwrap();
    assert_eq!(storage.get("k1").unwrap(), b"hello");
    assert!(matches!(
        storage.get("k2"),
        Err(EngineError::NotFound { .. })
    ));
}

/// Scenario B: a value above the spill threshold round-trips through a side file
#[test]
fn test_large_value_spills_transparently() {
    let dirs = TestDirs::new();
    let storage = SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap();
    let big: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    storage.put("big", &big).unwrap();
    assert_eq!(storage.get("big").unwrap(), big);

    let files = storage.all_files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0], dirs.db_path());
    assert!(files[1]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("replaykit.file.db."));
}

/// Scenario C: replaying an unrecorded call is an explicit miss
#[tokio::test]
async fn test_replay_miss_is_not_found() {
    let manager = pinned_manager(Mode::Replay, Arc::new(MemoryStorage::new()));
    let events = EventLog::attach(&manager);
    let http = Intercepted::new(FakeHttpService::new(), HttpCodec, manager.clone());

    let err = http
        .call(&HttpRequestData::new("GET", "http://svc/unknown", Vec::new()))
        .await
        .unwrap_err();

    assert!(err.is_replay_miss());
    assert!(matches!(err, CallError::Engine(EngineError::NotFound { .. })));
    assert_eq!(http.delegate().calls(), 0);
    assert_eq!(events.kinds(), vec![EVENT_REPLAY_MISS.to_string()]);
}

/// Scenario D: a failure seen during recording is replayed with the same message
#[tokio::test]
async fn test_recorded_failure_replays_identically() {
    let manager = pinned_manager(Mode::Record, Arc::new(MemoryStorage::new()));
    let service = FakeHttpService::new().failing_route("http://svc/flaky", "timeout");
    let http = Intercepted::new(service, HttpCodec, manager.clone());
    let req = HttpRequestData::new("GET", "http://svc/flaky", Vec::new());

    let live = http.call(&req).await.unwrap_err();
    assert!(matches!(live, CallError::Upstream(_)));

    manager.set_mode(Mode::Replay);
    let replayed = http.call(&req).await.unwrap_err();
    assert!(matches!(replayed, CallError::Replayed(_)));
    assert_eq!(replayed.to_string(), "timeout");
    assert!(!replayed.is_replay_miss());
    assert_eq!(http.delegate().calls(), 1);
}

/// JSON bodies that differ only in field order replay the same recording
#[tokio::test]
async fn test_http_key_ignores_json_field_order() {
    let manager = pinned_manager(Mode::Record, Arc::new(MemoryStorage::new()));
    let service = FakeHttpService::new().route("http://svc/search", r#"{"hits":3}"#);
    let http = Intercepted::new(service, HttpCodec, manager.clone());

    let recorded = http
        .call(&HttpRequestData::new(
            "POST",
            "http://svc/search",
            br#"{"q":"rust","page":1}"#.to_vec(),
        ))
        .await
        .unwrap();

    manager.set_mode(Mode::Replay);
    let replayed = http
        .call(&HttpRequestData::new(
            "POST",
            "http://svc/search",
            br#"{ "page": 1, "q": "rust" }"#.to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(replayed, recorded);
    assert_eq!(replayed.body, br#"{"hits":3}"#);
    assert_eq!(http.delegate().calls(), 1);
}

/// A cache miss (Nil) is a legitimate recorded value, not a replay miss
#[tokio::test]
async fn test_cache_nil_reply_replays() {
    let manager = pinned_manager(Mode::Record, Arc::new(MemoryStorage::new()));
    let events = EventLog::attach(&manager);
    let cache = Intercepted::new(
        FakeCacheServer::default(),
        CacheCodec::for_client("127.0.0.1:6379", "tcp"),
        manager.clone(),
    );

    let get = CacheCommand::new("GET", ["session:42"]);
    let set = CacheCommand::new("SET", ["session:42", "alice"]);
    assert_eq!(cache.call(&get).await.unwrap(), CacheReply::Nil);
    cache.call(&set).await.unwrap();

    manager.set_mode(Mode::Replay);
    assert_eq!(cache.call(&get).await.unwrap(), CacheReply::Nil);
    assert_eq!(
        cache.call(&set).await.unwrap(),
        CacheReply::Status("OK".to_string())
    );
    assert_eq!(cache.delegate().calls(), 2);
    assert_eq!(events.count(EVENT_RECORDING), 2);
    assert_eq!(events.count(EVENT_REPLAYING), 2);
}

/// Repeating a call under a new trace records a separate outcome
#[tokio::test]
async fn test_traces_isolate_repeated_calls() {
    let manager = pinned_manager(Mode::Record, Arc::new(MemoryStorage::new()));
    let cache = Intercepted::new(
        FakeCacheServer::default(),
        CacheCodec::new("cache-a"),
        manager.clone(),
    );
    let traces = TraceIdSequence::new();
    let get = CacheCommand::new("GET", ["counter"]);

    traces.start(&manager);
    assert_eq!(cache.call(&get).await.unwrap(), CacheReply::Nil);
    cache
        .call(&CacheCommand::new("SET", ["counter", "1"]))
        .await
        .unwrap();
    traces.start(&manager);
    assert_eq!(
        cache.call(&get).await.unwrap(),
        CacheReply::Bulk(b"1".to_vec())
    );

    manager.set_mode(Mode::Replay);
    traces.reset();
    traces.start(&manager);
    assert_eq!(cache.call(&get).await.unwrap(), CacheReply::Nil);
    traces.start(&manager);
    assert_eq!(
        cache.call(&get).await.unwrap(),
        CacheReply::Bulk(b"1".to_vec())
    );
}

struct FakeDatabase;

#[async_trait::async_trait]
impl ExternalCall for FakeDatabase {
    type Request = SqlQuery;
    type Response = SqlRows;
    type Error = String;

    async fn invoke(&self, query: &SqlQuery) -> Result<SqlRows, String> {
        match query.params.first() {
            Some(SqlValue::Int(id)) => Ok(SqlRows {
                columns: vec!["id".into(), "name".into()],
                rows: vec![vec![SqlValue::Int(*id), SqlValue::Text(format!("user-{id}"))]],
            }),
            _ => Err("missing id parameter".to_string()),
        }
    }
}

struct FakeWriter;

#[async_trait::async_trait]
impl ExternalCall for FakeWriter {
    type Request = SqlQuery;
    type Response = SqlExecResult;
    type Error = String;

    async fn invoke(&self, _query: &SqlQuery) -> Result<SqlExecResult, String> {
        Ok(SqlExecResult {
            last_insert_id: 7,
            rows_affected: 1,
        })
    }
}

/// Recordings persisted to SQLite replay from a separately opened store
#[tokio::test]
async fn test_sqlite_recording_replays_after_reopen() {
    let dirs = TestDirs::new();
    let query = SqlQuery::new("mysql://db/app", "SELECT id, name FROM users WHERE id = ?")
        .bind(SqlValue::Int(5));
    let insert = SqlQuery::new("mysql://db/app", "INSERT INTO users (name) VALUES (?)")
        .bind(SqlValue::Text("bob".into()));

    let recorded = {
        let storage = SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap();
        let manager = pinned_manager(Mode::Record, Arc::new(storage));
        let reader = Intercepted::new(FakeDatabase, SqlCodec::query(), manager.clone());
        let writer = Intercepted::new(FakeWriter, SqlCodec::exec(), manager.clone());
        writer.call(&insert).await.unwrap();
        let rows = reader.call(&query).await.unwrap();
        manager.storage().unwrap().close();
        rows
    };

    let storage = SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap();
    let manager = pinned_manager(Mode::Replay, Arc::new(storage));
    let reader = Intercepted::new(FakeDatabase, SqlCodec::query(), manager.clone());
    let writer = Intercepted::new(FakeWriter, SqlCodec::exec(), manager.clone());

    assert_eq!(reader.call(&query).await.unwrap(), recorded);
    assert_eq!(writer.call(&insert).await.unwrap().last_insert_id, 7);

    let other = SqlQuery::new("mysql://db/app", "SELECT id, name FROM users WHERE id = ?")
        .bind(SqlValue::Int(6));
    assert!(reader.call(&other).await.unwrap_err().is_replay_miss());
}

/// Swapping storage closes the previous engine
#[test]
fn test_storage_swap_closes_previous() {
    let dirs = TestDirs::new();
    let manager = pinned_manager(
        Mode::Record,
        Arc::new(SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap()),
    );
    manager.store_value("k", b"v1").unwrap();
    let old = manager.storage().unwrap();

    manager.set_storage(Arc::new(MemoryStorage::new()));
    assert!(matches!(old.get("k"), Err(EngineError::StorageClosed)));
    assert!(manager.get_value("k").unwrap_err().is_not_found());
}

/// Many threads recording then replaying through one SQLite-backed manager
#[test]
fn test_concurrent_record_and_replay_share_one_store() {
    const THREADS: usize = 8;
    const CALLS: usize = 25;

    let dirs = TestDirs::new();
    let storage = SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap();
    let manager = pinned_manager(Mode::Record, Arc::new(storage));

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                for i in 0..CALLS {
                    let key = format!("thread-{t}@@call-{i}");
                    let value = format!("value-{t}-{i}");
                    manager.store_value(&key, value.as_bytes()).unwrap();
                    assert_eq!(manager.get_value(&key).unwrap(), value.as_bytes());
                }
            });
        }
    });

    manager.set_mode(Mode::Replay);
    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                for i in (0..CALLS).rev() {
                    let key = format!("thread-{t}@@call-{i}");
                    let expected = format!("value-{t}-{i}");
                    assert_eq!(manager.get_value(&key).unwrap(), expected.as_bytes());
                }
            });
        }
    });
}

/// Intercepted calls from a multi-threaded runtime each replay their own outcome
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_intercepted_calls_replay_their_own_outcome() {
    let dirs = TestDirs::new();
    let storage = SqliteStorage::open(dirs.db_path(), SqliteOptions::default()).unwrap();
    let manager = pinned_manager(Mode::Record, Arc::new(storage));
    let reader = Arc::new(Intercepted::new(
        FakeDatabase,
        SqlCodec::query(),
        manager.clone(),
    ));
    let query = |id: i64| {
        SqlQuery::new("mysql://db/app", "SELECT id, name FROM users WHERE id = ?")
            .bind(SqlValue::Int(id))
    };

    let mut handles = Vec::new();
    for id in 0..16 {
        let reader = reader.clone();
        let q = query(id);
        handles.push(tokio::spawn(async move { reader.call(&q).await.unwrap() }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    manager.set_mode(Mode::Replay);
    let mut handles = Vec::new();
    for id in (0..16).rev() {
        let reader = reader.clone();
        let q = query(id);
        handles.push(tokio::spawn(async move { (id, reader.call(&q).await.unwrap()) }));
    }
    for handle in handles {
        let (id, rows) = handle.await.unwrap();
        assert_eq!(rows.rows[0][1], SqlValue::Text(format!("user-{id}")));
    }
}
