//! The subset of GitHub webhook payloads the build controller consumes.

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    CheckRun(CheckRunEvent),
    Installation(InstallationEvent),
    InstallationRepositories(InstallationRepositoriesEvent),
    Create(RefEvent),
    Delete(RefEvent),
    Other { kind: String, installation_id: Option<u64> },
}

impl WebhookEvent {
    /// Parse a delivery body according to its `X-GitHub-Event` header.
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self> {
        fn parse<T: for<'de> Deserialize<'de>>(kind: &str, body: &[u8]) -> Result<T> {
            serde_json::from_slice(body).with_context(|| format!("Malformed {kind} payload"))
        }
        Ok(match kind {
            "pull_request" => Self::PullRequest(parse(kind, body)?),
            "check_run" => Self::CheckRun(parse(kind, body)?),
            "installation" => Self::Installation(parse(kind, body)?),
            "installation_repositories" => Self::InstallationRepositories(parse(kind, body)?),
            "create" => Self::Create(parse(kind, body)?),
            "delete" => Self::Delete(parse(kind, body)?),
            _ => {
                #[derive(Deserialize)]
                struct Envelope {
                    installation: Option<InstallationRef>,
                }
                let envelope: Envelope = parse(kind, body)?;
                Self::Other {
                    kind: kind.to_string(),
                    installation_id: envelope.installation.map(|i| i.id),
                }
            }
        })
    }

    pub fn installation_id(&self) -> Option<u64> {
        match self {
            Self::PullRequest(e) => e.installation.as_ref().map(|i| i.id),
            Self::CheckRun(e) => e.installation.as_ref().map(|i| i.id),
            Self::Installation(e) => Some(e.installation.id),
            Self::InstallationRepositories(e) => Some(e.installation.id),
            Self::Create(e) | Self::Delete(e) => e.installation.as_ref().map(|i| i.id),
            Self::Other { installation_id, .. } => *installation_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::PullRequest(_) => "pull_request",
            Self::CheckRun(_) => "check_run",
            Self::Installation(_) => "installation",
            Self::InstallationRepositories(_) => "installation_repositories",
            Self::Create(_) => "create",
            Self::Delete(_) => "delete",
            Self::Other { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: Account,
}

/// Repository entry as listed in installation payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySummary {
    pub id: u64,
    pub name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repository,
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub number: u64,
    pub head: GitRef,
    pub base: GitRef,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    Created,
    Rerequested,
    Completed,
    RequestedAction,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRunEvent {
    pub action: CheckRunAction,
    pub check_run: CheckRunPayload,
    pub repository: Repository,
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRunPayload {
    pub id: u64,
    pub head_sha: String,
    pub app: App,
    pub check_suite: CheckSuite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuite {
    pub head_branch: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationAction {
    Created,
    Deleted,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationEvent {
    pub action: InstallationAction,
    pub installation: InstallationRef,
    #[serde(default)]
    pub repositories: Vec<RepositorySummary>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationRepositoriesAction {
    Added,
    Removed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRepositoriesEvent {
    pub action: InstallationRepositoriesAction,
    pub installation: InstallationRef,
    #[serde(default)]
    pub repositories_added: Vec<RepositorySummary>,
    #[serde(default)]
    pub repositories_removed: Vec<RepositorySummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub ref_type: String,
    pub repository: Repository,
    pub installation: Option<InstallationRef>,
}

impl RefEvent {
    pub fn is_branch(&self) -> bool { self.ref_type == "branch" }
}
