//! Check-run lifecycle: webhook events in, builds out, reports back.

pub mod abort;
pub mod build;
mod checks;
pub mod finalize;
pub mod logs;
mod repos;
pub mod summary;
pub mod supervisor;

use std::sync::Arc;

use gcb_ci_cache::RelationCache;
use gcb_ci_cloud::{BuildService, ObjectStorage};
use gcb_ci_core::{config::Config, models::TrackedRepos};
use gcb_ci_github::{
    ReviewPlatform,
    checks::CheckRunOutput,
    events::{CheckRunAction, WebhookEvent},
};
use gcb_ci_source::SourcePipeline;
pub use supervisor::Supervisor;

/// Shared context for every event handler. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    pub config: Arc<Config>,
    pub cache: RelationCache,
    pub github: Arc<dyn ReviewPlatform>,
    pub builds: Arc<dyn BuildService>,
    pub storage: Arc<dyn ObjectStorage>,
    pub source: Arc<SourcePipeline>,
    pub supervisor: Supervisor,
}

impl Controller {
    fn check_name(&self) -> &str { &self.config.github.check_name }

    fn output(&self, summary: impl Into<String>) -> CheckRunOutput {
        CheckRunOutput {
            title: self.check_name().to_string(),
            summary: summary.into(),
            text: Some(format!("{} version {}", self.check_name(), env!("CARGO_PKG_VERSION"))),
            annotations: Vec::new(),
        }
    }

    /// Integration branch of a tracked repository, falling back to the configured default.
    fn target_branch(&self, repos: &TrackedRepos, full_name: &str, repo_name: &str) -> Option<String> {
        if !repos.contains(full_name) {
            return None;
        }
        repos
            .target_branch(full_name)
            .map(str::to_string)
            .or_else(|| self.config.repo(repo_name).and_then(|r| r.target_branch.clone()))
    }

    /// Hand an accepted event to a background task.
    pub fn spawn_event(&self, event: WebhookEvent) {
        let this = self.clone();
        match event {
            WebhookEvent::PullRequest(event) => {
                self.supervisor.spawn("pull_request", async move { this.on_pull_request(event).await })
            }
            WebhookEvent::CheckRun(event) => match event.action {
                CheckRunAction::Created => {
                    self.supervisor.spawn("build", async move { this.initiate_build(event).await })
                }
                CheckRunAction::Rerequested => {
                    self.supervisor.spawn("rerequest", async move { this.on_check_run_rerequested(event).await })
                }
                _ => {}
            },
            WebhookEvent::Installation(event) => {
                self.supervisor.spawn("installation", async move { this.on_installation(event).await })
            }
            WebhookEvent::InstallationRepositories(event) => self
                .supervisor
                .spawn("installation_repositories", async move { this.on_installation_repositories(event).await }),
            WebhookEvent::Create(event) => {
                self.supervisor.spawn("create", async move { this.on_branch_created(event).await })
            }
            WebhookEvent::Delete(event) => {
                self.supervisor.spawn("delete", async move { this.on_branch_deleted(event).await })
            }
            WebhookEvent::Other { .. } => {}
        }
    }
}
