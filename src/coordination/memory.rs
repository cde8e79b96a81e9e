//! In-process [`ListStore`] with the same observable semantics as Redis.
//!
//! Expiry is enforced lazily: an expired key is dropped the next time any
//! operation touches it.  Lists that become empty are removed, so `DEL` on a
//! drained channel reports 0 just like the server would.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::time::Instant;

use super::ListStore;

#[derive(Debug)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A `HashMap`-backed store for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the live (non-expired) key space.
    fn with_entries<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }

    /// Current string value of `key`, if any.  Used by tests to inspect lock
    /// tokens.
    pub fn get(&self, key: &str) -> Option<String> {
        self.with_entries(key, |entries| match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        })
    }
}

#[async_trait::async_trait]
impl ListStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_entries(key, |entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn del(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(key, |entries| u64::from(entries.remove(key).is_some())))
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        Ok(self.with_entries(key, |entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(s), .. }) if s == expected
            );
            if matches {
                entries.remove(key);
            }
            matches
        }))
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.with_entries(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(anyhow!(WRONGTYPE)),
        })
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        self.with_entries(key, |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(list.len() as u64)
                }
                Value::Str(_) => Err(anyhow!(WRONGTYPE)),
            }
        })
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(key, |entries| {
            let (popped, now_empty) = match entries.get_mut(key) {
                None => return Ok(None),
                Some(Entry {
                    value: Value::List(list),
                    ..
                }) => {
                    let popped = list.pop_back();
                    (popped, list.is_empty())
                }
                Some(_) => return Err(anyhow!(WRONGTYPE)),
            };
            if now_empty {
                entries.remove(key);
            }
            Ok(popped)
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
