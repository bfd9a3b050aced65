use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Minimal key-value contract the relation cache is built on.
///
/// There are no transactions: callers doing read-modify-write must tolerate lost updates.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, replacing any previous value and its expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Set the expiry of an existing key. Missing keys are ignored.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}
