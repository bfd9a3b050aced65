pub mod checks;
pub mod events;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod webhook;

use std::{fmt, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gcb_ci_core::config::GitHubConfig;
use moka::future::Cache;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

use crate::checks::{CheckRun, CheckRunRequest};

// Installation tokens expire after an hour.
const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

/// Repository coordinates on the review platform.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self { owner: owner.into(), name: name.into() }
    }

    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        (!owner.is_empty() && !name.is_empty()).then(|| Self::new(owner, name))
    }

    pub fn full_name(&self) -> String { format!("{}/{}", self.owner, self.name) }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Operations the controller performs against the review platform on behalf of an installation.
#[async_trait]
pub trait ReviewPlatform: Send + Sync {
    fn app_id(&self) -> u64;

    /// Access token for git transport, minted on demand and cached.
    async fn installation_token(&self, installation_id: u64) -> Result<String>;

    async fn forget_installation(&self, installation_id: u64);

    async fn create_check_run(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<CheckRun>;

    async fn update_check_run(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<()>;

    async fn list_branches(&self, installation_id: u64, repo: &RepoRef) -> Result<Vec<String>>;
}

#[derive(Clone)]
struct InstallationAccess {
    token: String,
    client: Octocrab,
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
}

#[derive(Deserialize)]
struct Branch {
    name: String,
}

#[derive(Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

const PAGE_SIZE: u8 = 100;

/// GitHub App client. Installation clients are cached per installation until their token expires.
#[derive(Clone)]
pub struct GitHubApp {
    app_id: u64,
    app_client: Octocrab,
    installations: Cache<u64, InstallationAccess>,
}

impl GitHubApp {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let pem = std::fs::read(&config.private_key_path).with_context(|| {
            format!("Failed to read private key {}", config.private_key_path.display())
        })?;
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(&pem).context("Invalid app private key")?;
        let app_client = Octocrab::builder()
            .app(config.app_id.into(), key)
            .build()
            .context("Failed to create GitHub client")?;
        tracing::info!("Using GitHub App {}", config.app_id);
        Ok(Self {
            app_id: config.app_id,
            app_client,
            installations: Cache::builder().time_to_live(TOKEN_TTL).build(),
        })
    }

    async fn access(&self, installation_id: u64) -> Result<InstallationAccess> {
        self.installations
            .try_get_with(installation_id, self.mint_access(installation_id))
            .await
            .map_err(|e| anyhow!("Failed to authenticate installation {installation_id}: {e:#}"))
    }

    async fn mint_access(&self, installation_id: u64) -> Result<InstallationAccess> {
        let response: AccessToken = self
            .app_client
            .post(format!("/app/installations/{installation_id}/access_tokens"), None::<&()>)
            .await
            .context("Failed to create installation access token")?;
        let client = Octocrab::builder()
            .personal_token(response.token.clone())
            .build()
            .context("Failed to create installation client")?;
        tracing::debug!(installation = installation_id, "Minted installation token");
        Ok(InstallationAccess { token: response.token, client })
    }

    async fn client(&self, installation_id: u64) -> Result<Octocrab> {
        Ok(self.access(installation_id).await?.client)
    }
}

#[async_trait]
impl ReviewPlatform for GitHubApp {
    fn app_id(&self) -> u64 { self.app_id }

    async fn installation_token(&self, installation_id: u64) -> Result<String> {
        Ok(self.access(installation_id).await?.token)
    }

    async fn forget_installation(&self, installation_id: u64) {
        self.installations.invalidate(&installation_id).await;
    }

    async fn create_check_run(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<CheckRun> {
        let client = self.client(installation_id).await?;
        let check_run: CheckRun = client
            .post(format!("/repos/{}/{}/check-runs", repo.owner, repo.name), Some(request))
            .await
            .with_context(|| format!("Failed to create check run on {repo}"))?;
        tracing::info!(installation = installation_id, check_run = check_run.id, "Created check run on {repo}");
        Ok(check_run)
    }

    async fn update_check_run(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<()> {
        let client = self.client(installation_id).await?;
        let _: CheckRun = client
            .patch(format!("/repos/{}/{}/check-runs/{check_run_id}", repo.owner, repo.name), Some(request))
            .await
            .with_context(|| format!("Failed to update check run {check_run_id} on {repo}"))?;
        tracing::debug!(
            installation = installation_id,
            check_run = check_run_id,
            status = ?request.status,
            "Updated check run"
        );
        Ok(())
    }

    async fn list_branches(&self, installation_id: u64, repo: &RepoRef) -> Result<Vec<String>> {
        let client = self.client(installation_id).await?;
        let mut branches = Vec::new();
        let mut page = 1;
        loop {
            let items: Vec<Branch> = client
                .get(
                    format!("/repos/{}/{}/branches", repo.owner, repo.name),
                    Some(&PageParams { per_page: Some(PAGE_SIZE), page: Some(page) }),
                )
                .await
                .with_context(|| format!("Failed to list branches of {repo} (page {page})"))?;
            let done = items.len() < PAGE_SIZE as usize;
            branches.extend(items.into_iter().map(|b| b.name));
            if done {
                break;
            }
            page += 1;
        }
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::RepoRef;

    #[test]
    fn test_repo_ref_from_full_name() {
        let cases: &[(&str, Option<(&str, &str)>)] = &[
            ("org/data", Some(("org", "data"))),
            ("org/", None),
            ("/data", None),
            ("data", None),
        ];
        for &(full_name, expected) in cases {
            assert_eq!(
                RepoRef::from_full_name(full_name),
                expected.map(|(owner, name)| RepoRef::new(owner, name)),
                "{full_name}"
            );
        }
        assert_eq!(RepoRef::new("org", "data").full_name(), "org/data");
    }
}
