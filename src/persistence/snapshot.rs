//! Snapshot File
//!
//! The snapshot is a JSON object keyed by store key:
//!
//! ```text
//! {
//!   "name":  { "value": { "type": "string", "data": "Ariz" }, "expires_at": null },
//!   "queue": { "value": { "type": "list", "data": ["a", "b"] },
//!              "expires_at": { "secs": 1767225600, "nanos": 0 } }
//! }
//! ```
//!
//! `expires_at` is wall-clock time since the Unix epoch, so it stays meaningful
//! across restarts. Expired entries are written and loaded like any other;
//! the expiry paths remove them after startup.

use crate::storage::{Entry, Store, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default snapshot location, relative to the working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = "backup.rdb";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum PersistedValue {
    String(String),
    List(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct UnixTime {
    secs: u64,
    nanos: u32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct PersistedEntry {
    value: PersistedValue,
    expires_at: Option<UnixTime>,
}

impl From<&Entry> for PersistedEntry {
    fn from(entry: &Entry) -> Self {
        let value = match &entry.value {
            Value::Str(s) => PersistedValue::String(s.clone()),
            Value::List(list) => PersistedValue::List(list.iter().cloned().collect()),
        };
        // Instants before the epoch are long gone; the epoch is just as expired.
        let expires_at = entry.expires_at.map(|t| {
            let since = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            UnixTime {
                secs: since.as_secs(),
                nanos: since.subsec_nanos(),
            }
        });
        Self { value, expires_at }
    }
}

impl From<PersistedEntry> for Entry {
    fn from(persisted: PersistedEntry) -> Self {
        let value = match persisted.value {
            PersistedValue::String(s) => Value::Str(s),
            PersistedValue::List(list) => Value::List(list.into()),
        };
        let expires_at = persisted
            .expires_at
            .map(|t| UNIX_EPOCH + Duration::new(t.secs, t.nanos));
        Entry::with_expiry(value, expires_at)
    }
}

/// Encodes a keyspace copy to snapshot bytes.
pub fn encode(entries: &HashMap<String, Entry>) -> Result<Vec<u8>, PersistenceError> {
    let persisted: HashMap<&str, PersistedEntry> = entries
        .iter()
        .map(|(key, entry)| (key.as_str(), PersistedEntry::from(entry)))
        .collect();
    Ok(serde_json::to_vec(&persisted)?)
}

/// Decodes snapshot bytes. Empty input decodes to an empty keyspace.
pub fn decode(bytes: &[u8]) -> Result<HashMap<String, Entry>, PersistenceError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }
    let persisted: HashMap<String, PersistedEntry> = serde_json::from_slice(bytes)?;
    Ok(persisted
        .into_iter()
        .map(|(key, entry)| (key, Entry::from(entry)))
        .collect())
}

/// Saves and loads the store at a fixed path.
///
/// Saves are serialized through an internal mutex, so `SAVE` and the shutdown
/// path can't interleave their writes.
#[derive(Debug)]
pub struct Snapshotter {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl Snapshotter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole store to disk. Returns the number of keys written.
    ///
    /// The snapshot goes to `<path>.tmp` first and is renamed over `<path>`,
    /// so a crash mid-write never leaves a truncated snapshot behind.
    pub fn save(&self, store: &Store) -> Result<usize, PersistenceError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        let entries = store.snapshot();
        let bytes = encode(&entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;

        info!(
            path = %self.path.display(),
            keys = entries.len(),
            bytes = bytes.len(),
            "Snapshot saved"
        );
        Ok(entries.len())
    }

    /// Runs [`save`](Self::save) on Tokio's blocking pool, so the file I/O and
    /// the keyspace copy don't hold up an async worker.
    pub async fn save_in_background(
        self: Arc<Self>,
        store: Arc<Store>,
    ) -> Result<usize, PersistenceError> {
        tokio::task::spawn_blocking(move || self.save(&store)).await?
    }

    /// Reads the snapshot into a new store.
    ///
    /// A missing or empty file yields an empty store.
    pub fn load(&self) -> Result<Store, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(Store::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries = decode(&bytes)?;
        info!(
            path = %self.path.display(),
            keys = entries.len(),
            "Snapshot loaded"
        );
        Ok(Store::from_entries(entries))
    }

    /// Like [`load`](Self::load), but a snapshot that fails to decode is
    /// renamed to `<path>.corrupt` and an empty store is returned. A later
    /// save then can't overwrite the only copy of the data.
    ///
    /// I/O errors are returned unchanged and leave the file where it is.
    pub fn load_or_set_aside(&self) -> Result<Store, PersistenceError> {
        match self.load() {
            Err(PersistenceError::Encoding(e)) => {
                let kept = self.corrupt_path();
                fs::rename(&self.path, &kept)?;
                warn!(
                    path = %self.path.display(),
                    kept = %kept.display(),
                    error = %e,
                    "Snapshot is corrupt, moved aside; starting empty"
                );
                Ok(Store::new())
            }
            other => other,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        self.with_suffix(".tmp")
    }

    fn corrupt_path(&self) -> PathBuf {
        self.with_suffix(".corrupt")
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}
