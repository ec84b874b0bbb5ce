//! In-process store with Redis list/set/expiry semantics.
//!
//! Every call takes one lock over the whole key space, so each primitive is
//! atomic just like a single Redis command. Intended for tests, benches and
//! embedding without a Redis server.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::error::{QueueError, QueueResult};
use crate::core::store::Store;

#[derive(Debug, Clone)]
enum Entry {
    Str {
        #[allow(dead_code)]
        value: String,
        expires_at: Option<Instant>,
    },
    List(VecDeque<Bytes>),
    Set(BTreeSet<String>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Entry::Str { expires_at: Some(at), .. } if *at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

fn wrong_type(key: &str) -> QueueError {
    QueueError::store(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `QueueError::Store`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    fn check_online(&self) -> QueueResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueueError::store("memory store is offline"));
        }
        Ok(())
    }

    /// Runs `f` over the key map after dropping `key` if it has expired.
    fn with_key<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
            entries.remove(key);
        }
        f(&mut entries)
    }

    fn list_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> QueueResult<&'a mut VecDeque<Bytes>> {
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn set_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> QueueResult<&'a mut BTreeSet<String>> {
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    /// Redis drops empty lists and sets.
    fn remove_if_empty(entries: &mut HashMap<String, Entry>, key: &str) {
        let empty = match entries.get(key) {
            Some(Entry::List(list)) => list.is_empty(),
            Some(Entry::Set(set)) => set.is_empty(),
            _ => false,
        };
        if empty {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        self.check_online()?;
        let entry = Entry::Str {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> QueueResult<Option<Duration>> {
        self.check_online()?;
        self.with_key(key, |entries| match entries.get(key) {
            Some(Entry::Str {
                expires_at: Some(at),
                ..
            }) => Ok(Some(at.saturating_duration_since(Instant::now()))),
            _ => Ok(None),
        })
    }

    async fn del(&self, key: &str) -> QueueResult<bool> {
        self.check_online()?;
        Ok(self.with_key(key, |entries| entries.remove(key).is_some()))
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> QueueResult<u64> {
        self.check_online()?;
        self.with_key(key, |entries| {
            let list = Self::list_mut(entries, key)?;
            list.push_front(Bytes::copy_from_slice(value));
            Ok(list.len() as u64)
        })
    }

    async fn lrem(&self, key: &str, count: u64, value: &[u8]) -> QueueResult<u64> {
        self.check_online()?;
        self.with_key(key, |entries| {
            if !entries.contains_key(key) {
                return Ok(0);
            }
            let list = Self::list_mut(entries, key)?;
            let mut removed = 0u64;
            list.retain(|item| {
                if (count == 0 || removed < count) && item.as_ref() == value {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            Self::remove_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<Bytes>> {
        self.check_online()?;
        self.with_key(source, |entries| {
            if !entries.contains_key(source) {
                return Ok(None);
            }
            // type-check the destination before touching the source
            if let Some(Entry::Str { .. } | Entry::Set(_)) = entries.get(destination) {
                return Err(wrong_type(destination));
            }
            let Some(value) = Self::list_mut(entries, source)?.pop_back() else {
                return Ok(None);
            };
            Self::remove_if_empty(entries, source);
            Self::list_mut(entries, destination)?.push_front(value.clone());
            Ok(Some(value))
        })
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        self.check_online()?;
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn drain(&self, key: &str) -> QueueResult<u64> {
        self.check_online()?;
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => {
                let len = list.len() as u64;
                entries.remove(key);
                Ok(len)
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> QueueResult<bool> {
        self.check_online()?;
        self.with_key(key, |entries| {
            Ok(Self::set_mut(entries, key)?.insert(member.to_string()))
        })
    }

    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool> {
        self.check_online()?;
        self.with_key(key, |entries| {
            if !entries.contains_key(key) {
                return Ok(false);
            }
            let removed = Self::set_mut(entries, key)?.remove(member);
            Self::remove_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        self.check_online()?;
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn flush(&self) -> QueueResult<()> {
        self.check_online()?;
        self.entries.lock().clear();
        Ok(())
    }
}
