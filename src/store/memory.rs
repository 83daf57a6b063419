//! In-process store.
//!
//! Keyed values live in a concurrent hash map; lists and counters sit behind
//! a single mutex that is never held across an await point.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use super::{expiry_millis, Store, StoreFuture};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: i64,
}

#[derive(Default)]
struct Structures {
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, (i64, i64)>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<papaya::HashMap<String, Entry>>,
    structures: Arc<Mutex<Structures>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn structures(&self) -> MutexGuard<'_, Structures> {
        // A panic while holding the lock cannot leave a list half-modified,
        // so a poisoned guard is still usable.
        self.structures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    fn lpush<'a>(&'a self, list: &'a str, value: String) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut structures = self.structures();
            let list = structures.lists.entry(list.to_owned()).or_default();
            list.push_front(value);
            Ok(list.len() as u64)
        })
    }

    fn rpop<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut structures = self.structures();
            Ok(structures.lists.get_mut(list).and_then(VecDeque::pop_back))
        })
    }

    fn lrange<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let structures = self.structures();
            Ok(structures
                .lists
                .get(list)
                .map(|items| items.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn llen<'a>(&'a self, list: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let structures = self.structures();
            Ok(structures.lists.get(list).map_or(0, |items| items.len() as u64))
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let now = now_millis();
            let values = self.values.pin();
            Ok(values
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone()))
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entry = Entry {
                value,
                expires_at: expiry_millis(now_millis(), ttl),
            };
            self.values.pin().insert(key.to_owned(), entry);
            Ok(())
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let now = now_millis();
            let structures = self.structures();
            Ok(structures
                .counters
                .get(key)
                .filter(|(_, expires_at)| *expires_at > now)
                .map_or(0, |(value, _)| *value))
        })
    }

    fn incr_ex<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let now = now_millis();
            let mut structures = self.structures();
            let counter = structures
                .counters
                .entry(key.to_owned())
                .or_insert((0, now));

            if counter.1 <= now {
                *counter = (0, expiry_millis(now, ttl));
            }
            counter.0 += 1;

            Ok(counter.0)
        })
    }

    fn evict_expired(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let now = now_millis();
            let mut removed = 0;

            let values = self.values.pin();
            let expired: Vec<String> = values
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if values.remove(&key).is_some() {
                    removed += 1;
                }
            }

            let mut structures = self.structures();
            let before = structures.counters.len();
            structures
                .counters
                .retain(|_, (_, expires_at)| *expires_at > now);
            removed += (before - structures.counters.len()) as u64;

            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests as shared;

    #[tokio::test]
    async fn test_list_is_fifo() {
        shared::list_is_fifo(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_lists_are_independent() {
        shared::lists_are_independent(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_values_expire() {
        shared::values_expire(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_counters_expire() {
        shared::counters_expire(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.lpush("list", "a".to_owned()).await.unwrap();
        assert_eq!(other.llen("list").await.unwrap(), 1);
    }
}
