//! Persistence
//!
//! Full-store snapshots: written on `SAVE` and on shutdown, read once at
//! startup before the listener opens.

pub mod snapshot;

pub use snapshot::{decode, encode, PersistenceError, Snapshotter, DEFAULT_SNAPSHOT_PATH};
