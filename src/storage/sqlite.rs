//! Durable single-file storage on SQLite.
//!
//! Every value is written with a trailing marker byte:
//! - `m`: the payload is stored inline in the bucket row
//! - `p`: the row holds the name of a side file that contains the payload
//!
//! Values whose marked length exceeds the spill threshold go to a side file
//! next to the database file, so the database itself stays small.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::Storage;
use crate::error::{EngineError, Result};

pub const DEFAULT_BUCKET: &str = "global_bucket";
pub const DEFAULT_SPILL_THRESHOLD: usize = 1024 * 1024;

const INLINE_MARKER: u8 = b'm';
const POINTER_MARKER: u8 = b'p';
const SIDE_FILE_PREFIX: &str = "replaykit.file.db.";
const SIDE_FILE_PROBES: usize = 1024;
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Table holding all entries
    pub bucket: String,
    /// Marked values larger than this many bytes are spilled to a side file
    pub spill_threshold: usize,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        }
    }
}

struct Inner {
    conn: Option<Connection>,
    /// Side files written by this process
    side_files: BTreeSet<PathBuf>,
}

pub struct SqliteStorage {
    path: PathBuf,
    dir: PathBuf,
    options: SqliteOptions,
    inner: Mutex<Inner>,
}

impl SqliteStorage {
    /// Open or create a store at `path`.
    pub fn open(path: impl Into<PathBuf>, options: SqliteOptions) -> Result<Self> {
        let path = path.into();
        if !is_valid_bucket(&options.bucket) {
            return Err(EngineError::Config(format!(
                "invalid bucket name: {:?}",
                options.bucket
            )));
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );",
            options.bucket
        ))?;

        tracing::debug!(
            path = %path.display(),
            bucket = %options.bucket,
            threshold = options.spill_threshold,
            "Opened sqlite storage"
        );

        Ok(Self {
            path,
            dir,
            options,
            inner: Mutex::new(Inner {
                conn: Some(conn),
                side_files: BTreeSet::new(),
            }),
        })
    }

    pub fn open_default(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, SqliteOptions::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    /// All keys in the bucket, in key order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or(EngineError::StorageClosed)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM \"{}\" ORDER BY key",
            self.options.bucket
        ))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn read_entry(&self, conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = conn
            .query_row(
                &format!("SELECT value FROM \"{}\" WHERE key = ?1", self.options.bucket),
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(entry)
    }

    fn write_entry(&self, conn: &Connection, key: &str, entry: &[u8]) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\" (key, value) VALUES (?1, ?2)",
                self.options.bucket
            ),
            params![key, entry],
        )?;
        Ok(())
    }

    /// Side file currently referenced by `key`, if any.
    fn existing_side_file(&self, conn: &Connection, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.read_entry(conn, key)? else {
            return Ok(None);
        };
        match entry.split_last() {
            Some((&POINTER_MARKER, name)) => Ok(Some(String::from_utf8_lossy(name).into_owned())),
            _ => Ok(None),
        }
    }

    fn next_side_file_name(&self, taken: &BTreeSet<PathBuf>) -> Result<String> {
        let prefix = format!(
            "{SIDE_FILE_PREFIX}{}",
            chrono::Local::now().format("%Y%m%d%H%M%S")
        );
        let is_free = |name: &str| {
            let path = self.dir.join(name);
            !path.exists() && !taken.contains(&path)
        };

        if is_free(&prefix) {
            return Ok(prefix);
        }
        for i in 0..SIDE_FILE_PROBES {
            let name = format!("{prefix}.{i}");
            if is_free(&name) {
                return Ok(name);
            }
        }

        Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free side file name for prefix {prefix}"),
        )))
    }
}

impl Storage for SqliteStorage {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let conn = inner.conn.as_ref().ok_or(EngineError::StorageClosed)?;

        let mut marked = Vec::with_capacity(value.len() + 1);
        marked.extend_from_slice(value);
        marked.push(INLINE_MARKER);

        if marked.len() <= self.options.spill_threshold {
            return self.write_entry(conn, key, &marked);
        }

        let name = match self.existing_side_file(conn, key)? {
            Some(name) => name,
            None => self.next_side_file_name(&inner.side_files)?,
        };
        let side_path = self.dir.join(&name);
        fs::write(&side_path, &marked)?;

        let mut pointer = name.into_bytes();
        pointer.push(POINTER_MARKER);
        self.write_entry(conn, key, &pointer)?;

        tracing::debug!(
            key = %key,
            file = %side_path.display(),
            size = value.len(),
            "Spilled large value to side file"
        );
        inner.side_files.insert(side_path);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or(EngineError::StorageClosed)?;

        let entry = self
            .read_entry(conn, key)?
            .ok_or_else(|| EngineError::NotFound {
                key: key.to_string(),
            })?;

        let invalid = || EngineError::InvalidEntry {
            key: key.to_string(),
        };

        match entry.split_last() {
            Some((&INLINE_MARKER, payload)) => Ok(payload.to_vec()),
            Some((&POINTER_MARKER, name)) => {
                let side_path = self.dir.join(String::from_utf8_lossy(name).as_ref());
                let mut data = fs::read(&side_path).map_err(|err| {
                    EngineError::Io(std::io::Error::new(
                        err.kind(),
                        format!("read side file {} failed: {err}", side_path.display()),
                    ))
                })?;
                match data.pop() {
                    Some(INLINE_MARKER) => Ok(data),
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }

    fn clear(&self) -> Result<()> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or(EngineError::StorageClosed)?;
        conn.execute(&format!("DELETE FROM \"{}\"", self.options.bucket), [])?;
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.conn.take() {
            if let Err((_, err)) = conn.close() {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Failed to close sqlite storage cleanly"
                );
            }
        }
    }

    fn all_files(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        std::iter::once(self.path.clone())
            .chain(inner.side_files.iter().cloned())
            .collect()
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

fn is_valid_bucket(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
