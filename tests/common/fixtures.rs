//! Fake dependencies and scratch directories for integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use replaykit::adapters::{CacheCommand, CacheReply, HttpRequestData, HttpResponseData};
use replaykit::{EngineConfig, ExternalCall, Mode, ReplayManager};
use tempfile::TempDir;

/// HTTP backend answering from a fixed route table.
///
/// Unknown URLs fail with `connection refused`.
pub struct FakeHttpService {
    routes: HashMap<String, Result<HttpResponseData, String>>,
    calls: AtomicUsize,
}

impl FakeHttpService {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn route(mut self, url: &str, body: &str) -> Self {
        self.routes
            .insert(url.to_string(), Ok(HttpResponseData::ok(body.as_bytes().to_vec())));
        self
    }

    pub fn failing_route(mut self, url: &str, message: &str) -> Self {
        self.routes.insert(url.to_string(), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalCall for FakeHttpService {
    type Request = HttpRequestData;
    type Response = HttpResponseData;
    type Error = String;

    async fn invoke(&self, request: &HttpRequestData) -> Result<HttpResponseData, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.routes
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Err("connection refused".to_string()))
    }
}

/// In-memory cache server supporting GET, SET and DEL.
#[derive(Default)]
pub struct FakeCacheServer {
    data: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl FakeCacheServer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalCall for FakeCacheServer {
    type Request = CacheCommand;
    type Response = CacheReply;
    type Error = String;

    async fn invoke(&self, cmd: &CacheCommand) -> Result<CacheReply, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock();
        match (cmd.name.to_ascii_uppercase().as_str(), cmd.args.as_slice()) {
            ("GET", [key]) => Ok(data
                .get(key)
                .map(|v| CacheReply::Bulk(v.clone()))
                .unwrap_or(CacheReply::Nil)),
            ("SET", [key, value]) => {
                data.insert(key.clone(), value.as_bytes().to_vec());
                Ok(CacheReply::Status("OK".to_string()))
            }
            ("DEL", keys) => {
                let removed = keys.iter().filter(|k| data.remove(*k).is_some()).count();
                Ok(CacheReply::Int(removed as i64))
            }
            (name, _) => Err(format!("ERR unknown command '{name}'")),
        }
    }
}

/// Notification sink: `(kind, key)` pairs in arrival order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl EventLog {
    pub fn attach(manager: &ReplayManager) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        manager.set_notify(move |kind, key, _payload| {
            sink.lock().push((kind.to_string(), key.to_string()));
        });
        log
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|(k, _)| k == kind).count()
    }
}

/// Scratch root holding storage and bundle directories.
pub struct TestDirs {
    pub tmp: TempDir,
}

impl TestDirs {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.root().join("data").join("replaykit.db")
    }

    pub fn cases_dir(&self) -> PathBuf {
        self.root().join("cases")
    }

    /// Engine configuration rooted in this directory
    pub fn config(&self, mode: Mode) -> EngineConfig {
        let mut config = EngineConfig::default().with_mode(mode);
        config.db_dir = self.root().join("data");
        config.output_dir = self.cases_dir();
        config
    }
}

impl Default for TestDirs {
    fn default() -> Self {
        Self::new()
    }
}
