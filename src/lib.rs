//! Record/replay engine for offline regression testing.
//!
//! In record mode every intercepted call to an external dependency is executed
//! and its outcome stored under a deterministic key. In replay mode the same
//! calls are answered from storage without touching the network.

pub mod adapters;
pub mod bundle;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod intercept;
pub mod key;
pub mod manager;
pub mod mode;
pub mod storage;

pub use codec::{CallCodec, JsonCodec, Outcome, RawCodec};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{CallError, EngineError, Result};
pub use intercept::{ExternalCall, Intercepted, Interceptor};
pub use key::{canonical_json, derive_key, AdapterKind};
pub use manager::ReplayManager;
pub use mode::{Mode, ResetKind};
pub use storage::{MemoryStorage, SqliteOptions, SqliteStorage, Storage};
