//! Mode and state shared by every intercepted call site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::key::{derive_custom_key, derive_key, AdapterKind, GenKeyFn};
use crate::mode::{Mode, ResetKind};
use crate::storage::{SqliteOptions, SqliteStorage, Storage};

pub const DEFAULT_TRACE_ID: &str = "replaykit_global_trace_id@@20190618";
const GEN_KEY_MARKER: &str = "RegressionMgrInfo@EnableGenKey";
const GEN_KEY_ENABLED: &[u8] = b"enable";

/// Observability callback: `(kind, key, payload)`.
pub type NotifyFn = Arc<dyn Fn(&str, &str, &[u8]) + Send + Sync>;

pub type ResetFn = Arc<dyn Fn(ResetKind) + Send + Sync>;

/// Holds the current mode, the active storage and the engine hooks.
///
/// Construct one per process (or per test) and share it as `Arc<ReplayManager>`.
pub struct ReplayManager {
    mode: RwLock<Mode>,
    store: RwLock<Option<Arc<dyn Storage>>>,
    notifier: RwLock<NotifyFn>,
    gen_key: RwLock<Option<GenKeyFn>>,
    reset: RwLock<ResetFn>,
    trace_id: RwLock<String>,
}

impl ReplayManager {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: RwLock::new(mode),
            store: RwLock::new(None),
            notifier: RwLock::new(Arc::new(|_: &str, _: &str, _: &[u8]| {})),
            gen_key: RwLock::new(None),
            reset: RwLock::new(Arc::new(|_: ResetKind| {})),
            trace_id: RwLock::new(DEFAULT_TRACE_ID.to_string()),
        }
    }

    pub fn with_storage(mode: Mode, storage: Arc<dyn Storage>) -> Self {
        let manager = Self::new(mode);
        manager.set_storage(storage);
        manager
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Replay mode changed");
        }
    }

    pub fn should_record(&self) -> bool {
        self.mode() == Mode::Record
    }

    pub fn is_enabled(&self) -> bool {
        self.mode().is_enabled()
    }

    /// Install a new storage engine and close the previous one.
    ///
    /// The swap is published before the old engine is closed. Calls that
    /// already hold the old engine finish against it.
    pub fn set_storage(&self, storage: Arc<dyn Storage>) {
        let previous = self.store.write().replace(storage);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Open a SQLite store at `path` and make it the active storage.
    pub fn open_sqlite_storage(&self, path: impl AsRef<Path>, options: SqliteOptions) -> Result<()> {
        let storage = SqliteStorage::open(path.as_ref(), options)?;
        self.set_storage(Arc::new(storage));
        self.reset(ResetKind::Storage);
        Ok(())
    }

    pub fn storage(&self) -> Result<Arc<dyn Storage>> {
        self.store.read().clone().ok_or(EngineError::NoStorage)
    }

    pub fn has_storage(&self) -> bool {
        self.store.read().is_some()
    }

    pub fn store_value(&self, key: &str, value: &[u8]) -> Result<()> {
        self.storage()?.put(key, value)
    }

    pub fn get_value(&self, key: &str) -> Result<Vec<u8>> {
        self.storage()?.get(key)
    }

    pub fn clear_storage(&self) -> Result<()> {
        self.storage()?.clear()
    }

    /// Backing files of the active storage.
    pub fn db_files(&self) -> Vec<PathBuf> {
        self.store
            .read()
            .as_ref()
            .map(|s| s.all_files())
            .unwrap_or_default()
    }

    pub fn set_notify<F>(&self, f: F)
    where
        F: Fn(&str, &str, &[u8]) + Send + Sync + 'static,
    {
        *self.notifier.write() = Arc::new(f);
    }

    pub fn notify(&self, kind: &str, key: &str, payload: &[u8]) {
        tracing::trace!(kind = %kind, key = %key, size = payload.len(), "replay event");
        let notifier = self.notifier.read().clone();
        notifier(kind, key, payload);
    }

    pub fn set_gen_key<F>(&self, f: F)
    where
        F: Fn(AdapterKind, &str, &[u8]) -> Option<String> + Send + Sync + 'static,
    {
        *self.gen_key.write() = Some(Arc::new(f));
    }

    pub fn clear_gen_key(&self) {
        *self.gen_key.write() = None;
    }

    /// Mark the active storage as recorded with custom keys.
    pub fn enable_gen_key(&self) -> Result<()> {
        self.store_value(GEN_KEY_MARKER, GEN_KEY_ENABLED)
    }

    pub fn is_gen_key_enabled(&self) -> bool {
        matches!(self.get_value(GEN_KEY_MARKER), Ok(v) if v == GEN_KEY_ENABLED)
    }

    pub fn set_reset<F>(&self, f: F)
    where
        F: Fn(ResetKind) + Send + Sync + 'static,
    {
        *self.reset.write() = Arc::new(f);
    }

    pub fn reset(&self, kind: ResetKind) {
        let reset = self.reset.read().clone();
        reset(kind);
    }

    pub fn trace_id(&self) -> String {
        self.trace_id.read().clone()
    }

    pub fn set_trace_id(&self, trace_id: impl Into<String>) {
        *self.trace_id.write() = trace_id.into();
    }

    /// Start a fresh trace with a random id and return it.
    pub fn start_trace(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.set_trace_id(id.clone());
        id
    }

    /// Key for one call under the current trace.
    ///
    /// The custom key hook is consulted only when installed and enabled for
    /// the active storage.
    pub fn key_for(&self, kind: AdapterKind, tag: &str, canonical: &[u8]) -> String {
        let trace_id = self.trace_id();
        let hook = self.gen_key.read().clone();
        if let Some(hook) = hook {
            if self.is_gen_key_enabled() {
                if let Some(custom) = hook(kind, tag, canonical).filter(|s| !s.is_empty()) {
                    return derive_custom_key(&trace_id, tag, &custom);
                }
            }
        }
        derive_key(&trace_id, tag, canonical)
    }
}

impl Default for ReplayManager {
    fn default() -> Self {
        Self::new(Mode::Off)
    }
}

impl std::fmt::Debug for ReplayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayManager")
            .field("mode", &self.mode())
            .field("has_storage", &self.has_storage())
            .field("trace_id", &self.trace_id())
            .finish()
    }
}

/// Process-wide manager for call sites that cannot receive one explicitly.
///
/// The first install wins; later installs return the existing manager.
pub mod global {
    use std::sync::{Arc, OnceLock};

    use super::ReplayManager;
    use crate::mode::Mode;

    static MANAGER: OnceLock<Arc<ReplayManager>> = OnceLock::new();

    pub fn install(manager: Arc<ReplayManager>) -> Arc<ReplayManager> {
        MANAGER.get_or_init(|| manager).clone()
    }

    pub fn enable(mode: Mode) -> Arc<ReplayManager> {
        if let Some(existing) = get() {
            return existing;
        }
        install(Arc::new(ReplayManager::new(mode)))
    }

    pub fn get() -> Option<Arc<ReplayManager>> {
        MANAGER.get().cloned()
    }
}
