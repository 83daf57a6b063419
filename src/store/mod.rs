//! Shared key-value store.
//!
//! The queue only needs a handful of Redis-like primitives: a list with push
//! and pop at opposite ends, keyed values with a time-to-live, and expiring
//! counters. Each primitive is atomic on its own; nothing here offers
//! multi-command transactions.
//!
//! Two backends are provided:
//! - [`SqliteStore`]: a SQLite file shared by every process on the host
//! - [`MemoryStore`]: an in-process store for development and tests

use std::{future::Future, pin::Pin, time::Duration};

use crate::error::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, Error>;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Storage primitives the queue is built on.
///
/// Lists follow Redis conventions: the *head* is where [`Store::lpush`]
/// inserts, [`Store::rpop`] removes from the *tail*, and [`Store::lrange`]
/// returns items from head to tail.
pub trait Store: Send + Sync + 'static {
    /// Inserts `value` at the head of `list`, returning the new length.
    fn lpush<'a>(&'a self, list: &'a str, value: String) -> StoreFuture<'a, u64>;

    /// Removes and returns the item at the tail of `list`.
    fn rpop<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Returns every item of `list`, head first.
    fn lrange<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Vec<String>>;

    fn llen<'a>(&'a self, list: &'a str) -> StoreFuture<'a, u64>;

    /// Reads a keyed value. Expired values read as absent.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Writes a keyed value, replacing any previous value and its expiry.
    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Current value of a counter, `0` if missing or expired.
    fn counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Increments a counter and returns the new value.
    ///
    /// The expiry is set only when the counter is created (or recreated
    /// after expiring), so repeated increments do not extend its lifetime.
    fn incr_ex<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, i64>;

    /// Drops expired values and counters, returning how many were removed.
    fn evict_expired(&self) -> StoreFuture<'_, u64>;
}

pub(crate) fn expiry_millis(now_millis: i64, ttl: Duration) -> i64 {
    now_millis.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Key layout shared by every component that talks to the store.
pub mod keys {
    use std::fmt::Display;

    pub const PENDING: &str = "queue:pending";

    pub fn job(id: impl Display) -> String {
        format!("job:{id}")
    }

    pub fn result(id: impl Display) -> String {
        format!("result:{id}")
    }

    pub fn error(id: impl Display) -> String {
        format!("error:{id}")
    }

    pub fn rate_limit(limiter: &str, window: i64) -> String {
        format!("ratelimit:{limiter}:{window}")
    }
}
