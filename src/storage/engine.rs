//! Thread-Safe Store with Expiry Support
//!
//! The store maps keys to [`Entry`] values: a [`Value`] (string or list) plus
//! an optional absolute expiry time.
//!
//! ## Concurrency Model
//!
//! One `RwLock<HashMap>` guards the whole keyspace. Readers run concurrently,
//! writers are exclusive. A value and its expiry live in the same `Entry`, so
//! they are always replaced together and nobody can observe one without the
//! other.
//!
//! Callers never get a reference that outlives the lock: reads hand back
//! clones, and read-modify-write goes through [`Store::mutate`], which runs a
//! closure inside a single write critical section.
//!
//! ## Lazy Expiry
//!
//! Every read that inspects a key checks its expiry first. An elapsed key is
//! removed on the spot and the read is reported as a miss.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// A stored value. Each key holds exactly one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(VecDeque<String>),
}

impl Value {
    /// The name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Result<&str, StoreError> {
        match self {
            Value::Str(s) => Ok(s),
            Value::List(_) => Err(StoreError::WrongType),
        }
    }

    pub fn as_list(&self) -> Result<&VecDeque<String>, StoreError> {
        match self {
            Value::List(list) => Ok(list),
            Value::Str(_) => Err(StoreError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut VecDeque<String>, StoreError> {
        match self {
            Value::List(list) => Ok(list),
            Value::Str(_) => Err(StoreError::WrongType),
        }
    }
}

/// A value together with the instant it expires at (`None` = never).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: Value, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Remaining time to live, or `None` if the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at.map(|exp| {
            exp.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Errors raised by typed store operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("increment or decrement would overflow")]
    Overflow,
}

/// The shared keyspace.
///
/// Wrap it in an `Arc` and hand it to every component that needs it.
///
/// # Example
///
/// ```
/// use emberkv::storage::{Entry, Store, Value};
///
/// let store = Store::new();
/// store.set("name", Value::Str("Ariz".into()), None);
/// assert_eq!(store.get_string("name"), Ok(Some("Ariz".to_string())));
///
/// assert_eq!(store.rpush("queue", vec!["a".into(), "b".into()]), Ok(2));
/// assert!(store.get_string("queue").is_err());
/// ```
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<String, Entry>>,

    /// Keys removed because their expiry elapsed (lazy or active)
    expired_count: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with `entries`, as loaded from a snapshot.
    ///
    /// Entries whose expiry already passed are kept; the normal expiry paths
    /// remove them.
    pub fn from_entries(entries: HashMap<String, Entry>) -> Self {
        Self {
            data: RwLock::new(entries),
            expired_count: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` on the live entry for `key`.
    ///
    /// A stale entry is deleted under the write lock and reported as `None`.
    fn read_live<R>(&self, key: &str, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(f(entry)),
                Some(_) => {}
                None => return None,
            }
        }

        let mut data = self.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            // Replaced by a writer between the two locks
            Some(entry) => Some(f(entry)),
            None => None,
        }
    }

    /// Returns a copy of the live entry for `key`.
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.read_live(key, Entry::clone)
    }

    /// Returns the string stored at `key`.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read_live(key, |entry| entry.value.as_str().map(str::to_string))
            .transpose()
    }

    /// Inserts or replaces `key`. Value and expiry are both overwritten.
    pub fn set(&self, key: impl Into<String>, value: Value, expires_at: Option<SystemTime>) {
        self.write()
            .insert(key.into(), Entry::with_expiry(value, expires_at));
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Removes each key in `keys` under one lock, returning how many were present.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let mut data = self.write();
        keys.iter()
            .filter(|key| {
                let key: &str = key.as_ref();
                data.remove(key).is_some()
            })
            .count()
    }

    /// Reports whether `key` is present in the map, without checking expiry.
    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Counts how many of `keys` are present. Repeated keys count repeatedly.
    pub fn exists_many<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let data = self.read();
        keys.iter()
            .filter(|key| {
                let key: &str = key.as_ref();
                data.contains_key(key)
            })
            .count()
    }

    /// Lists every key that carries an expiry. Order is unspecified.
    pub fn keys_with_expiry(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Deletes `key` if its expiry has elapsed. Returns true if it was deleted.
    pub fn remove_if_expired(&self, key: &str, now: SystemTime) -> bool {
        let mut data = self.write();
        if data.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            data.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Read-modify-write of a single key inside one exclusive critical section.
    ///
    /// `f` receives the live entry (`None` if absent or expired) and may
    /// replace it, edit it, or set it to `None` to delete the key.
    pub fn mutate<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<Entry>) -> R,
    {
        let mut data = self.write();
        let mut slot = data.remove(key);

        if slot.as_ref().is_some_and(Entry::is_expired) {
            slot = None;
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }

        let result = f(&mut slot);

        if let Some(entry) = slot {
            data.insert(key.to_string(), entry);
        }
        result
    }

    /// Adds `delta` to the integer stored at `key`, keeping its expiry.
    ///
    /// Returns `Ok(None)` and changes nothing when the key is absent.
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<Option<i64>, StoreError> {
        self.mutate(key, |slot| {
            let Some(entry) = slot else {
                return Ok(None);
            };

            let current: i64 = entry
                .value
                .as_str()?
                .parse()
                .map_err(|_| StoreError::NotInteger)?;
            let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;

            entry.value = Value::Str(next.to_string());
            Ok(Some(next))
        })
    }

    /// Pushes `values` onto the head of the list at `key`, one at a time, so
    /// the last value given ends up first. Returns the new length.
    pub fn lpush(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError> {
        self.push(key, values, |list, value| list.push_front(value))
    }

    /// Appends `values` to the tail of the list at `key`. Returns the new length.
    pub fn rpush(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError> {
        self.push(key, values, |list, value| list.push_back(value))
    }

    // A push leaves the list without an expiry.
    fn push(
        &self,
        key: &str,
        values: Vec<String>,
        insert: impl Fn(&mut VecDeque<String>, String),
    ) -> Result<usize, StoreError> {
        self.mutate(key, |slot| {
            let entry = slot.get_or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
            let list = entry.value.as_list_mut()?;
            for value in values {
                insert(list, value);
            }
            let len = list.len();
            entry.expires_at = None;
            Ok(len)
        })
    }

    /// Returns the elements between `start` and `stop`, both inclusive.
    /// Negative indices count from the tail (-1 is the last element).
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let range = self.read_live(key, |entry| {
            let list = entry.value.as_list()?;
            let len = list.len() as i64;

            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

            if start > stop || start >= len {
                return Ok(Vec::new());
            }

            Ok(list
                .iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .cloned()
                .collect())
        });
        range.unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Returns the length of the list at `key` (0 if absent).
    pub fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.read_live(key, |entry| entry.value.as_list().map(VecDeque::len))
            .unwrap_or(Ok(0))
    }

    /// Remaining TTL of `key` in milliseconds.
    ///
    /// - `None` if the key doesn't exist
    /// - `Some(-1)` if the key has no expiry
    pub fn pttl(&self, key: &str) -> Option<i64> {
        self.read_live(key, |entry| {
            entry
                .ttl()
                .map(|remaining| remaining.as_millis() as i64)
                .unwrap_or(-1)
        })
    }

    /// Returns `"string"`, `"list"`, or `"none"`.
    pub fn key_type(&self, key: &str) -> &'static str {
        self.read_live(key, |entry| entry.value.type_name())
            .unwrap_or("none")
    }

    /// Copies the whole keyspace under one read lock.
    pub fn snapshot(&self) -> HashMap<String, Entry> {
        self.read().clone()
    }

    /// Number of keys in the map, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total keys removed because they expired.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn in_millis(ms: u64) -> Option<SystemTime> {
        Some(SystemTime::now() + Duration::from_millis(ms))
    }

    fn past() -> Option<SystemTime> {
        Some(SystemTime::now() - Duration::from_secs(1))
    }

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        store.set("name", s("Ariz"), None);
        assert_eq!(store.get_string("name"), Ok(Some("Ariz".to_string())));
        assert_eq!(store.get_string("missing"), Ok(None));
    }

    #[test]
    fn test_set_replaces_value_and_expiry() {
        let store = Store::new();
        store.set("k", s("v1"), in_millis(60_000));
        store.set("k", Value::List(VecDeque::from(vec!["a".to_string()])), None);

        let entry = store.get("k").unwrap();
        assert_eq!(entry.value.type_name(), "list");
        assert_eq!(entry.expires_at, None);
    }

    #[test]
    fn test_delete() {
        let store = Store::new();
        store.set("k", s("v"), None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.delete_many(&["a", "b"]), 0);
    }

    #[test]
    fn test_exists_counts_presence() {
        let store = Store::new();
        store.set("a", s("1"), None);
        store.set("stale", s("1"), past());
        assert_eq!(store.exists_many(&["a", "a", "stale", "nope"]), 3);
    }

    #[test]
    fn test_get_deletes_expired_key() {
        let store = Store::new();
        store.set("k", s("v"), past());
        assert_eq!(store.len(), 1);

        assert_eq!(store.get_string("k"), Ok(None));
        assert_eq!(store.len(), 0);
        assert_eq!(store.expired_count(), 1);
    }

    #[test]
    fn test_expiry_elapses() {
        let store = Store::new();
        store.set("k", s("v"), in_millis(50));
        assert_eq!(store.get_string("k"), Ok(Some("v".to_string())));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(store.get_string("k"), Ok(None));
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_get_string_on_list_is_wrong_type() {
        let store = Store::new();
        store.rpush("l", vec!["a".to_string()]).unwrap();
        assert_eq!(store.get_string("l"), Err(StoreError::WrongType));
    }

    #[test]
    fn test_keys_with_expiry() {
        let store = Store::new();
        store.set("persistent", s("v"), None);
        store.set("volatile", s("v"), in_millis(60_000));
        assert_eq!(store.keys_with_expiry(), vec!["volatile".to_string()]);
    }

    #[test]
    fn test_remove_if_expired() {
        let store = Store::new();
        store.set("live", s("v"), in_millis(60_000));
        store.set("dead", s("v"), past());

        let now = SystemTime::now();
        assert!(!store.remove_if_expired("live", now));
        assert!(store.remove_if_expired("dead", now));
        assert!(!store.remove_if_expired("missing", now));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mutate_sees_expired_as_absent() {
        let store = Store::new();
        store.set("k", s("old"), past());

        let was_present = store.mutate("k", |slot| {
            let present = slot.is_some();
            *slot = Some(Entry::new(s("new")));
            present
        });

        assert!(!was_present);
        assert_eq!(store.get_string("k"), Ok(Some("new".to_string())));
    }

    #[test]
    fn test_mutate_can_delete() {
        let store = Store::new();
        store.set("k", s("v"), None);
        store.mutate("k", |slot| *slot = None);
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_incr_keeps_expiry() {
        let store = Store::new();
        let expires_at = in_millis(60_000);
        store.set("n", s("41"), expires_at);

        assert_eq!(store.incr_by("n", 1), Ok(Some(42)));
        assert_eq!(store.incr_by("n", -2), Ok(Some(40)));

        let entry = store.get("n").unwrap();
        assert_eq!(entry.value, s("40"));
        assert_eq!(entry.expires_at, expires_at);
    }

    #[test]
    fn test_incr_missing_key_is_noop() {
        let store = Store::new();
        assert_eq!(store.incr_by("n", 1), Ok(None));
        assert!(!store.exists("n"));
    }

    #[test]
    fn test_incr_errors_leave_value() {
        let store = Store::new();
        store.set("text", s("hello"), None);
        assert_eq!(store.incr_by("text", 1), Err(StoreError::NotInteger));
        assert_eq!(store.get_string("text"), Ok(Some("hello".to_string())));

        store.set("max", s(&i64::MAX.to_string()), None);
        assert_eq!(store.incr_by("max", 1), Err(StoreError::Overflow));

        store.rpush("l", vec!["1".to_string()]).unwrap();
        assert_eq!(store.incr_by("l", 1), Err(StoreError::WrongType));
    }

    #[test]
    fn test_lpush_order() {
        let store = Store::new();
        assert_eq!(store.lpush("k", vec!["a".into(), "b".into()]), Ok(2));
        assert_eq!(store.lpush("k", vec!["c".into()]), Ok(3));
        assert_eq!(store.lrange("k", 0, -1), Ok(vec!["c".into(), "b".into(), "a".into()]));
    }

    #[test]
    fn test_rpush_order() {
        let store = Store::new();
        assert_eq!(store.rpush("k", vec!["a".into(), "b".into()]), Ok(2));
        assert_eq!(store.rpush("k", vec!["c".into()]), Ok(3));
        assert_eq!(store.lrange("k", 0, -1), Ok(vec!["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn test_push_onto_string_is_wrong_type() {
        let store = Store::new();
        store.set("k", s("v"), None);
        assert_eq!(store.lpush("k", vec!["a".into()]), Err(StoreError::WrongType));
        assert_eq!(store.rpush("k", vec!["a".into()]), Err(StoreError::WrongType));
        assert_eq!(store.get_string("k"), Ok(Some("v".to_string())));
    }

    #[test]
    fn test_push_clears_expiry() {
        let store = Store::new();
        store.rpush("k", vec!["a".into()]).unwrap();
        store.mutate("k", |slot| {
            if let Some(entry) = slot {
                entry.expires_at = in_millis(60_000);
            }
        });

        store.rpush("k", vec!["b".into()]).unwrap();
        assert_eq!(store.pttl("k"), Some(-1));
    }

    #[test]
    fn test_lrange_indices() {
        let store = Store::new();
        let items: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        store.rpush("k", items).unwrap();

        assert_eq!(store.lrange("k", 1, 2), Ok(vec!["b".into(), "c".into()]));
        assert_eq!(store.lrange("k", -2, -1), Ok(vec!["d".into(), "e".into()]));
        assert_eq!(store.lrange("k", -100, 0), Ok(vec!["a".into()]));
        assert_eq!(store.lrange("k", 3, 100).map(|v| v.len()), Ok(2));
        assert_eq!(store.lrange("k", 4, 1), Ok(vec![]));
        assert_eq!(store.lrange("k", 10, 20), Ok(vec![]));
        assert_eq!(store.lrange("missing", 0, -1), Ok(vec![]));
    }

    #[test]
    fn test_llen_and_type() {
        let store = Store::new();
        store.rpush("l", vec!["a".into(), "b".into()]).unwrap();
        store.set("s", s("v"), None);

        assert_eq!(store.llen("l"), Ok(2));
        assert_eq!(store.llen("missing"), Ok(0));
        assert_eq!(store.llen("s"), Err(StoreError::WrongType));

        assert_eq!(store.key_type("l"), "list");
        assert_eq!(store.key_type("s"), "string");
        assert_eq!(store.key_type("missing"), "none");
    }

    #[test]
    fn test_pttl() {
        let store = Store::new();
        assert_eq!(store.pttl("missing"), None);

        store.set("persistent", s("v"), None);
        assert_eq!(store.pttl("persistent"), Some(-1));

        store.set("volatile", s("v"), in_millis(10_000));
        let ttl = store.pttl("volatile").unwrap();
        assert!(ttl > 9_000 && ttl <= 10_000, "ttl = {}", ttl);
    }

    #[test]
    fn test_concurrent_incr_loses_no_updates() {
        let store = Arc::new(Store::new());
        store.set("counter", s("0"), None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.incr_by("counter", 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_string("counter"), Ok(Some("2000".to_string())));
    }
}
