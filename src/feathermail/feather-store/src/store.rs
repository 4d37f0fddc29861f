/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Value stored in the [`TtlStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    /// A counter, the only value kind [`TtlStore::increment`] operates on.
    Integer(i64),
    /// Opaque text.
    Text(String),
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Error produced by the store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// `increment` was called on a key holding a non-numeric value.
    #[error("value under key '{key}' is not numeric")]
    NotNumeric {
        /// The offending key.
        key: String,
    },
}

/// Outcome of the closure given to [`TtlStore::get_and_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Write this value back (with the call's ttl, when provided).
    Set(StoreValue),
    /// Delete the entry.
    Delete,
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoreValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expiry| now >= expiry)
    }
}

/// Concurrent key/value map with per-entry expiry.
///
/// All writes on a given key are linearizable; `increment` is atomic with
/// respect to concurrent increments of the same key.
#[derive(Debug, Default)]
pub struct TtlStore {
    map: DashMap<String, Entry>,
}

impl TtlStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value under `key`, deleting it first if it has expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoreValue> {
        let now = Instant::now();
        match self.map.get(key) {
            None => None,
            Some(entry) if entry.is_expired(now) => {
                // drop the read guard before mutating, see the dashmap
                // deadlock note in its documentation
                drop(entry);
                self.map.remove_if(key, |_, entry| entry.is_expired(now));
                None
            }
            Some(entry) => Some(entry.value.clone()),
        }
    }

    /// Unconditional write. The expiry is `now + ttl` when `ttl` is given,
    /// otherwise the entry never expires.
    pub fn put(&self, key: impl Into<String>, value: impl Into<StoreValue>, ttl: Option<Duration>) {
        self.map.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Remove `key`, regardless of its existence.
    pub fn delete(&self, key: &str) {
        self.map.remove(key);
    }

    /// Does `key` hold a live entry ?
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Atomically add `delta` to the counter under `key`.
    ///
    /// An absent or expired entry is (re)created at `delta`. The new value
    /// is returned.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotNumeric`] when the live entry is not a counter
    pub fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let now = Instant::now();

        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoreValue::Integer(0),
            expires_at: None,
        });

        let fresh = match &entry.value {
            _ if entry.is_expired(now) => delta,
            StoreValue::Integer(old) => old + delta,
            StoreValue::Text(_) => {
                return Err(StoreError::NotNumeric {
                    key: key.to_string(),
                })
            }
        };

        entry.value = StoreValue::Integer(fresh);
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }

        Ok(fresh)
    }

    /// Read-modify-write of a single key through `f`.
    ///
    /// `f` receives the live value (absent when missing or expired) and
    /// returns `(ret, update)`; the update is applied under the key's lock
    /// and `ret` is returned. Not atomic across keys.
    pub fn get_and_update<R>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&StoreValue>) -> (R, Update),
        ttl: Option<Duration>,
    ) -> R {
        let now = Instant::now();
        let entry = self.map.entry(key.to_string());

        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let live = if occupied.get().is_expired(now) {
                    None
                } else {
                    Some(&occupied.get().value)
                };
                let (ret, update) = f(live);
                match update {
                    Update::Set(value) => {
                        occupied.insert(Entry {
                            value,
                            expires_at: ttl.map(|ttl| now + ttl),
                        });
                    }
                    Update::Delete => {
                        occupied.remove();
                    }
                }
                ret
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (ret, update) = f(None);
                if let Update::Set(value) = update {
                    vacant.insert(Entry {
                        value,
                        expires_at: ttl.map(|ttl| now + ttl),
                    });
                }
                ret
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Number of live entries (expired ones excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.map.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Is the store devoid of live entries ?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every entry whose expiry has passed; returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired = self
            .map
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();

        let mut removed = 0;
        for key in expired {
            // re-check under the entry lock, another writer may have
            // refreshed it since the scan
            if self
                .map
                .remove_if(&key, |_, entry| entry.is_expired(now))
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Spawn the periodic sweeper on the current tokio runtime.
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = store.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired store entries.");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn get_put_delete() {
        let store = TtlStore::new();

        assert_eq!(store.get("k"), None);
        store.put("k", "v", None);
        assert_eq!(store.get("k"), Some(StoreValue::Text("v".to_string())));
        assert!(store.exists("k"));

        store.delete("k");
        assert_eq!(store.get("k"), None);
        // deleting a missing key is fine
        store.delete("k");
    }

    #[test]
    fn lazy_expiry() {
        let store = TtlStore::new();
        store.put("k", 1, Some(Duration::from_millis(10)));
        assert!(store.exists("k"));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn increment_from_absent() {
        let store = TtlStore::new();
        assert_eq!(store.increment("c", 2, None), Ok(2));
        assert_eq!(store.increment("c", 3, None), Ok(5));
        assert_eq!(store.get("c"), Some(StoreValue::Integer(5)));
    }

    #[test]
    fn increment_resets_after_expiry() {
        let store = TtlStore::new();
        assert_eq!(store.increment("c", 1, Some(Duration::from_millis(10))), Ok(1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.increment("c", 1, Some(Duration::from_millis(10))), Ok(1));
    }

    #[test]
    fn increment_not_numeric() {
        let store = TtlStore::new();
        store.put("k", "text", None);
        assert_eq!(
            store.increment("k", 1, None),
            Err(StoreError::NotNumeric {
                key: "k".to_string()
            })
        );
        // the original value is untouched
        assert_eq!(store.get("k"), Some(StoreValue::Text("text".to_string())));
    }

    // two concurrent increments return distinct values and the max equals
    // the stored result
    #[test]
    fn increment_is_atomic() {
        let store = std::sync::Arc::new(TtlStore::new());

        let handles = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| store.increment("c", 1, None).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate increment result {value}");
            }
        }

        assert_eq!(store.get("c"), Some(StoreValue::Integer(8000)));
        assert_eq!(seen.iter().max(), Some(&8000));
    }

    #[test]
    fn get_and_update() {
        let store = TtlStore::new();

        let ret = store.get_and_update(
            "k",
            |current| {
                assert!(current.is_none());
                ("created", Update::Set(StoreValue::Integer(1)))
            },
            None,
        );
        assert_eq!(ret, "created");

        let ret = store.get_and_update(
            "k",
            |current| {
                assert_eq!(current, Some(&StoreValue::Integer(1)));
                ("deleted", Update::Delete)
            },
            None,
        );
        assert_eq!(ret, "deleted");
        assert!(!store.exists("k"));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = TtlStore::new();
        store.put("gone", 1, Some(Duration::from_millis(5)));
        store.put("kept", 2, Some(Duration::from_secs(3600)));
        store.put("forever", 3, None);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.sweep(), 1);
        assert!(store.exists("kept"));
        assert!(store.exists("forever"));
    }

    #[test]
    fn clear() {
        let store = TtlStore::new();
        store.put("a", 1, None);
        store.put("b", 2, None);
        store.clear();
        assert!(store.is_empty());
    }
}
