//! Shared key-value store used by the cache, the rate limiter, load metrics and task records.
//!
//! Every operation returns `Result<_, StoreError>`; callers decide explicitly whether a
//! failure is absorbed (cache, limiter) or surfaced (task bookkeeping). No component holds a
//! lock across calls: access is optimistic, last-write-wins and TTL-bounded.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable during `{op}`: {message}")]
    Unavailable { op: &'static str, message: String },
    #[error("value under `{key}` could not be encoded or decoded: {message}")]
    Codec { key: String, message: String },
}

impl StoreError {
    pub fn unavailable(op: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            message: message.into(),
        }
    }

    pub fn codec(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Codec {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Write a value; `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete the given keys, returning how many live entries were removed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Delete every key starting with any of `prefixes` in one call.
    async fn delete_prefix(&self, prefixes: &[&str]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Read and decode a JSON value.
pub async fn get_json<T>(store: &dyn KvStore, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| StoreError::codec(key, err)),
        None => Ok(None),
    }
}

/// Encode a value as JSON and write it.
pub async fn set_json<T>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(value).map_err(|err| StoreError::codec(key, err))?;
    store.set(key, Bytes::from(encoded), ttl).await
}
