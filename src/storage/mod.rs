//! Key/value persistence for captured call outcomes.
//!
//! Two backends implement [`Storage`]:
//! - [`MemoryStorage`]: a volatile map, for tests and short-lived replay sets
//! - [`SqliteStorage`]: a single-file store with large values spilled to side files

mod memory;
mod sqlite;

use std::path::PathBuf;

use crate::error::Result;

pub use memory::MemoryStorage;
pub use sqlite::{SqliteOptions, SqliteStorage, DEFAULT_BUCKET, DEFAULT_SPILL_THRESHOLD};

/// Storage contract shared by every adapter.
///
/// `get` on a key that was never written returns [`EngineError::NotFound`],
/// never an empty value.
///
/// [`EngineError::NotFound`]: crate::error::EngineError::NotFound
pub trait Storage: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Discard all entries.
    fn clear(&self) -> Result<()>;

    /// Release the backing resources. Safe to call more than once.
    fn close(&self);

    /// Files that must be copied to reproduce this storage elsewhere.
    fn all_files(&self) -> Vec<PathBuf>;
}
