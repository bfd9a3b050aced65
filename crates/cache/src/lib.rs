//! Typed associations between installations, pull requests and check runs.
//!
//! Every value is JSON. Keys are built from numeric identifiers:
//!
//! | key | value |
//! |---|---|
//! | `{installation}:repositories` | [`TrackedRepos`] |
//! | `{owner}/{repo}` | branch names |
//! | `{installation}:{pull_request}` | [`Substitutions`] |
//! | `{installation}:{check_run}` | the owning pull request key |
//! | `{installation}:{pull_request}:checks` | every check-run key created for the pull request |
//! | `{head_sha}` | timestamp of the last check-run request for the commit |

mod memory;
mod redis_store;
mod store;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use gcb_ci_core::{
    config::{CacheConfig, CacheKind},
    models::{Substitutions, TrackedRepos},
    util::format_timestamp,
};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
use serde::{Serialize, de::DeserializeOwned};
pub use store::KeyValueStore;
use time::OffsetDateTime;

/// How long a head commit stays marked as already requested.
pub const HEAD_MARKER_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

pub fn repositories_key(installation_id: u64) -> String { format!("{installation_id}:repositories") }

pub fn pull_request_key(installation_id: u64, pull_request_id: u64) -> String {
    format!("{installation_id}:{pull_request_id}")
}

pub fn check_run_key(installation_id: u64, check_run_id: u64) -> String {
    format!("{installation_id}:{check_run_id}")
}

pub fn pull_request_checks_key(pull_request_key: &str) -> String { format!("{pull_request_key}:checks") }

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Association {
    Created,
    /// The check run was already linked to this pull request.
    Unchanged,
    /// The check run is linked to a different pull request, which was kept.
    Conflict,
}

#[derive(Clone)]
pub struct RelationCache {
    store: Arc<dyn KeyValueStore>,
}

impl RelationCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self { Self { store } }

    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match config.kind {
            CacheKind::Redis => Arc::new(
                RedisStore::connect(&config.url, config.read_url.as_deref())
                    .await
                    .context("Failed to connect to cache")?,
            ),
            CacheKind::Memory => {
                tracing::warn!("Using in-process cache; associations are lost on restart");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(store))
    }

    pub fn in_memory() -> Self { Self::new(Arc::new(MemoryStore::new())) }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed cache value for {key}"))?;
        Ok(Some(value))
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, None).await
    }

    pub async fn tracked_repos(&self, installation_id: u64) -> Result<Option<TrackedRepos>> {
        self.get_json(&repositories_key(installation_id)).await
    }

    pub async fn set_tracked_repos(&self, installation_id: u64, repos: &TrackedRepos) -> Result<()> {
        self.set_json(&repositories_key(installation_id), repos).await
    }

    pub async fn branches(&self, full_name: &str) -> Result<Option<Vec<String>>> {
        self.get_json(full_name).await
    }

    pub async fn set_branches(&self, full_name: &str, branches: &[String]) -> Result<()> {
        self.set_json(full_name, branches).await
    }

    pub async fn delete_branches(&self, full_names: &[String]) -> Result<()> {
        self.store.delete(full_names).await
    }

    /// Forget everything tracked for an installation.
    pub async fn delete_installation(&self, installation_id: u64) -> Result<()> {
        let mut keys = vec![repositories_key(installation_id)];
        if let Some(repos) = self.tracked_repos(installation_id).await? {
            keys.extend(repos.names().map(str::to_string));
        }
        self.store.delete(&keys).await
    }

    pub async fn substitutions(&self, pull_request_key: &str) -> Result<Option<Substitutions>> {
        self.get_json(pull_request_key).await
    }

    pub async fn set_substitutions(
        &self,
        installation_id: u64,
        pull_request_id: u64,
        substitutions: &Substitutions,
    ) -> Result<()> {
        self.set_json(&pull_request_key(installation_id, pull_request_id), substitutions).await
    }

    /// Pull request key associated with a check run.
    pub async fn association(&self, installation_id: u64, check_run_id: u64) -> Result<Option<String>> {
        self.get_json(&check_run_key(installation_id, check_run_id)).await
    }

    /// Link a check run to a pull request and record it in the pull request's index.
    ///
    /// An existing link to a different pull request is never replaced.
    pub async fn associate(
        &self,
        installation_id: u64,
        check_run_id: u64,
        pull_request_key: &str,
    ) -> Result<Association> {
        let key = check_run_key(installation_id, check_run_id);
        let outcome = match self.get_json::<String>(&key).await? {
            Some(existing) if existing == pull_request_key => Association::Unchanged,
            Some(existing) => {
                tracing::warn!(
                    "Check run {} already associated with {}, not relinking to {}",
                    key,
                    existing,
                    pull_request_key
                );
                return Ok(Association::Conflict);
            }
            None => {
                self.set_json(&key, pull_request_key).await?;
                Association::Created
            }
        };
        let checks = self.append_pull_request_check(pull_request_key, &key).await?;
        tracing::info!("Associated {} with {} ({} checks)", key, pull_request_key, checks.len());
        Ok(outcome)
    }

    pub async fn pull_request_checks(&self, pull_request_key: &str) -> Result<Vec<String>> {
        Ok(self.get_json(&pull_request_checks_key(pull_request_key)).await?.unwrap_or_default())
    }

    async fn append_pull_request_check(
        &self,
        pull_request_key: &str,
        check_key: &str,
    ) -> Result<Vec<String>> {
        let mut checks = self.pull_request_checks(pull_request_key).await?;
        if !checks.iter().any(|c| c == check_key) {
            checks.push(check_key.to_string());
            self.set_json(&pull_request_checks_key(pull_request_key), &checks).await?;
        }
        Ok(checks)
    }

    /// Drop a closed pull request: its check-run links, its index and its substitutions.
    pub async fn delete_pull_request(&self, installation_id: u64, pull_request_id: u64) -> Result<usize> {
        let key = pull_request_key(installation_id, pull_request_id);
        let checks = self.pull_request_checks(&key).await?;
        self.store.delete(&checks).await?;
        self.store.delete(&[pull_request_checks_key(&key), key]).await?;
        Ok(checks.len())
    }

    pub async fn head_requested(&self, head_sha: &str) -> Result<bool> {
        Ok(self.store.get(head_sha).await?.is_some())
    }

    pub async fn mark_head_requested(&self, head_sha: &str) -> Result<()> {
        let now = format_timestamp(OffsetDateTime::now_utc());
        self.store.set(head_sha, &now, None).await?;
        self.store.expire(head_sha, HEAD_MARKER_TTL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(repositories_key(7), "7:repositories");
        assert_eq!(pull_request_key(7, 99), "7:99");
        assert_eq!(check_run_key(7, 5), "7:5");
        assert_eq!(pull_request_checks_key("7:99"), "7:99:checks");
    }

    #[tokio::test]
    async fn test_association_is_never_replaced() {
        let cache = RelationCache::in_memory();
        assert_eq!(cache.associate(1, 10, "1:100").await.unwrap(), Association::Created);
        assert_eq!(cache.associate(1, 10, "1:100").await.unwrap(), Association::Unchanged);
        assert_eq!(cache.associate(1, 10, "1:200").await.unwrap(), Association::Conflict);
        assert_eq!(cache.association(1, 10).await.unwrap().as_deref(), Some("1:100"));
        assert_eq!(cache.pull_request_checks("1:100").await.unwrap(), vec!["1:10"]);
        assert!(cache.pull_request_checks("1:200").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_pull_request_removes_checks() {
        let cache = RelationCache::in_memory();
        let subs = Substitutions::new("abcdef0123", "repo", "feature", "main", 3);
        cache.set_substitutions(1, 100, &subs).await.unwrap();
        cache.associate(1, 10, "1:100").await.unwrap();
        cache.associate(1, 11, "1:100").await.unwrap();
        assert_eq!(cache.delete_pull_request(1, 100).await.unwrap(), 2);
        assert_eq!(cache.association(1, 10).await.unwrap(), None);
        assert_eq!(cache.association(1, 11).await.unwrap(), None);
        assert_eq!(cache.substitutions("1:100").await.unwrap(), None);
        assert!(cache.pull_request_checks("1:100").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_marker() {
        let cache = RelationCache::in_memory();
        assert!(!cache.head_requested("abc").await.unwrap());
        cache.mark_head_requested("abc").await.unwrap();
        assert!(cache.head_requested("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_installation() {
        let cache = RelationCache::in_memory();
        let mut repos = TrackedRepos::default();
        repos.insert("org/data", Some("dev".into()));
        cache.set_tracked_repos(5, &repos).await.unwrap();
        cache.set_branches("org/data", &["dev".into(), "main".into()]).await.unwrap();
        cache.delete_installation(5).await.unwrap();
        assert_eq!(cache.tracked_repos(5).await.unwrap(), None);
        assert_eq!(cache.branches("org/data").await.unwrap(), None);
    }
}
