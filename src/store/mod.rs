//! Key-value store boundary.
//!
//! Only opener records live here. The store is an external, already-synchronized service;
//! [`MemoryStore`] stands in for it when no Redis URL is configured.

pub mod error;
pub mod memory;
pub mod redis;


use std::time::Duration;

use async_trait::async_trait;

pub use self::redis::RedisStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

#[async_trait]
/// Minimal string key-value contract with optional per-key TTL.
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value`; `ttl: None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Deletes `key`. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> StoreResult<()>;
}
