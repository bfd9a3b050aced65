use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{AppError, retry::RetryPolicy};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub gcp: GcpConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-repository overrides, keyed by repository name (not full name).
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        );
        let config: Self =
            serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .retry
            .policy()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        Ok(config)
    }

    pub fn repo(&self, repo_name: &str) -> Option<&RepoConfig> { self.repos.get(repo_name) }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 5001 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub webhook_secret: String,
    pub private_key_path: PathBuf,
    #[serde(default = "default_check_name")]
    pub check_name: String,
}

fn default_check_name() -> String { "GCB-Build".to_string() }

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub kind: CacheKind,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Replica used for reads. Writes always go to `url`.
    pub read_url: Option<String>,
}

fn default_redis_url() -> String { "redis://redis-master:6379".to_string() }

impl Default for CacheConfig {
    fn default() -> Self { Self { kind: CacheKind::Redis, url: default_redis_url(), read_url: None } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcpConfig {
    pub project_id: String,
    pub credentials_path: PathBuf,
    #[serde(default = "default_source_bucket")]
    pub source_bucket: String,
}

fn default_source_bucket() -> String { "gcs-test-build-artifacts".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    pub workdir: PathBuf,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub substitution_wait_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("repos"),
            poll_interval_secs: 10,
            poll_timeout_secs: 4 * 60 * 60,
            substitution_wait_secs: 30,
        }
    }
}

impl BuildConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs) }

    pub fn poll_timeout(&self) -> Duration { Duration::from_secs(self.poll_timeout_secs) }

    pub fn substitution_wait(&self) -> Duration { Duration::from_secs(self.substitution_wait_secs) }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self { Self { attempts: 5, base_delay_ms: 500, max_delay_ms: 30_000, factor: 2.0 } }
}

impl RetryConfig {
    /// Backoff policy for these settings; rejects a factor below 1 or not finite.
    pub fn policy(&self) -> Result<RetryPolicy, AppError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(AppError::Config(format!("retry.factor must be at least 1, got {}", self.factor)));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(AppError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(RetryPolicy {
            attempts: self.attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RepoConfig {
    /// Integration branch assigned when the repository is first tracked.
    pub target_branch: Option<String>,
    /// Extra build substitutions, applied when a pull request targets `target_branch`.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}
