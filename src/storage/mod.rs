//! Storage
//!
//! The shared keyspace and the background task that expires keys in it.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │            Store             │
//!            │  RwLock<HashMap<key, Entry>> │
//!            └──────────────────────────────┘
//!                 ▲                    ▲
//!   commands (lazy expiry)     ExpirySweeper (active expiry)
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::{Store, Value};
//! use std::time::{Duration, SystemTime};
//!
//! let store = Store::new();
//! store.set("session", Value::Str("token".into()), Some(SystemTime::now() + Duration::from_secs(60)));
//! assert!(store.pttl("session").unwrap() > 0);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, Store, StoreError, Value};
pub use expiry::{run_cycle, start_expiry_sweeper, CycleReport, ExpiryConfig, ExpirySweeper};
