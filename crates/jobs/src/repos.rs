use anyhow::{Context, Result};
use gcb_ci_github::{
    RepoRef,
    events::{
        InstallationAction, InstallationEvent, InstallationRepositoriesAction, InstallationRepositoriesEvent,
        RefEvent, RepositorySummary,
    },
};

use crate::Controller;

impl Controller {
    async fn refresh_branches(&self, installation_id: u64, full_name: &str) -> Result<()> {
        let repo = RepoRef::from_full_name(full_name).with_context(|| format!("Invalid repository {full_name}"))?;
        let branches = self.github.list_branches(installation_id, &repo).await?;
        tracing::debug!(repo = full_name, "Caching {} branches", branches.len());
        self.cache.set_branches(full_name, &branches).await
    }

    /// Start tracking `repositories`; entries that are already tracked keep their target.
    async fn track(&self, installation_id: u64, repositories: &[RepositorySummary]) -> Result<()> {
        let mut repos = self.cache.tracked_repos(installation_id).await?.unwrap_or_default();
        for repository in repositories {
            self.refresh_branches(installation_id, &repository.full_name).await?;
            if repos.contains(&repository.full_name) {
                continue;
            }
            let target = self.config.repo(&repository.name).and_then(|r| r.target_branch.clone());
            tracing::info!(
                installation = installation_id,
                repo = %repository.full_name,
                "Tracking repository (target {})",
                target.as_deref().unwrap_or("none")
            );
            repos.insert(repository.full_name.clone(), target);
        }
        self.cache.set_tracked_repos(installation_id, &repos).await
    }

    async fn untrack(&self, installation_id: u64, repositories: &[RepositorySummary]) -> Result<()> {
        let Some(mut repos) = self.cache.tracked_repos(installation_id).await? else {
            return Ok(());
        };
        let mut removed = Vec::new();
        for repository in repositories {
            if repos.remove(&repository.full_name) {
                removed.push(repository.full_name.clone());
            }
        }
        tracing::info!(installation = installation_id, "Untracking {} repositories", removed.len());
        self.cache.delete_branches(&removed).await?;
        self.cache.set_tracked_repos(installation_id, &repos).await
    }

    pub(crate) async fn on_installation(&self, event: InstallationEvent) -> Result<()> {
        let installation_id = event.installation.id;
        match event.action {
            InstallationAction::Created => self.track(installation_id, &event.repositories).await,
            InstallationAction::Deleted => {
                tracing::info!(installation = installation_id, "Installation deleted");
                self.cache.delete_installation(installation_id).await?;
                self.github.forget_installation(installation_id).await;
                Ok(())
            }
            InstallationAction::Other => Ok(()),
        }
    }

    pub(crate) async fn on_installation_repositories(&self, event: InstallationRepositoriesEvent) -> Result<()> {
        let installation_id = event.installation.id;
        match event.action {
            InstallationRepositoriesAction::Added => self.track(installation_id, &event.repositories_added).await,
            InstallationRepositoriesAction::Removed => {
                self.untrack(installation_id, &event.repositories_removed).await
            }
            InstallationRepositoriesAction::Other => Ok(()),
        }
    }

    pub(crate) async fn on_branch_created(&self, event: RefEvent) -> Result<()> {
        if !event.is_branch() {
            return Ok(());
        }
        let installation_id = event.installation.as_ref().map(|i| i.id).context("Missing installation")?;
        self.refresh_branches(installation_id, &event.repository.full_name).await
    }

    pub(crate) async fn on_branch_deleted(&self, event: RefEvent) -> Result<()> {
        if !event.is_branch() {
            return Ok(());
        }
        let installation_id = event.installation.as_ref().map(|i| i.id).context("Missing installation")?;
        let full_name = &event.repository.full_name;
        self.refresh_branches(installation_id, full_name).await?;
        if let Some(mut repos) = self.cache.tracked_repos(installation_id).await?
            && repos.clear_branch(full_name, &event.ref_name)
        {
            tracing::warn!(repo = %full_name, "Target branch {} deleted", event.ref_name);
            self.cache.set_tracked_repos(installation_id, &repos).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gcb_ci_cloud::testing::{FakeBuildService, FakeStorage};
    use gcb_ci_core::models::TrackedRepos;
    use gcb_ci_source::git::testing::FakeGit;
    use serde_json::json;

    use crate::test_support::{Harness, harness};

    fn setup(dir: &std::path::Path) -> Harness {
        harness(dir, FakeGit::default(), FakeBuildService::default(), FakeStorage::default())
    }

    fn installation(action: &str) -> gcb_ci_github::events::InstallationEvent {
        serde_json::from_value(json!({
            "action": action,
            "installation": { "id": 5 },
            "repositories": [
                { "id": 7, "name": "data", "full_name": "org/data" },
                { "id": 8, "name": "web", "full_name": "org/web" },
            ],
        }))
        .unwrap()
    }

    fn ref_event(ref_type: &str, ref_name: &str) -> gcb_ci_github::events::RefEvent {
        serde_json::from_value(json!({
            "ref": ref_name,
            "ref_type": ref_type,
            "repository": { "id": 7, "name": "data", "full_name": "org/data", "owner": { "login": "org" } },
            "installation": { "id": 5 },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_installation_created_tracks_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());

        h.controller.on_installation(installation("created")).await.unwrap();

        let repos = h.controller.cache.tracked_repos(5).await.unwrap().unwrap();
        assert_eq!(repos.target_branch("org/data"), Some("dev"));
        assert!(repos.contains("org/web"));
        assert_eq!(repos.target_branch("org/web"), None);
        let branches = h.controller.cache.branches("org/data").await.unwrap().unwrap();
        assert_eq!(branches, vec!["dev", "main"]);
    }

    #[tokio::test]
    async fn test_existing_targets_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());
        let mut repos = TrackedRepos::default();
        repos.insert("org/data", Some("release".into()));
        h.controller.cache.set_tracked_repos(5, &repos).await.unwrap();

        h.controller.on_installation(installation("created")).await.unwrap();

        let repos = h.controller.cache.tracked_repos(5).await.unwrap().unwrap();
        assert_eq!(repos.target_branch("org/data"), Some("release"));
    }

    #[tokio::test]
    async fn test_installation_deleted_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());
        h.controller.on_installation(installation("created")).await.unwrap();

        h.controller.on_installation(installation("deleted")).await.unwrap();

        assert!(h.controller.cache.tracked_repos(5).await.unwrap().is_none());
        assert!(h.controller.cache.branches("org/data").await.unwrap().is_none());
        assert_eq!(*h.github.forgotten.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_repositories_removed() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());
        h.controller.on_installation(installation("created")).await.unwrap();
        let event = serde_json::from_value(json!({
            "action": "removed",
            "installation": { "id": 5 },
            "repositories_removed": [{ "id": 8, "name": "web", "full_name": "org/web" }],
        }))
        .unwrap();

        h.controller.on_installation_repositories(event).await.unwrap();

        let repos = h.controller.cache.tracked_repos(5).await.unwrap().unwrap();
        assert!(!repos.contains("org/web"));
        assert!(repos.contains("org/data"));
        assert!(h.controller.cache.branches("org/web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_target_branch_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());
        h.controller.on_installation(installation("created")).await.unwrap();
        h.github.branches.lock().unwrap().insert("org/data".into(), vec!["main".into()]);

        h.controller.on_branch_deleted(ref_event("tag", "dev")).await.unwrap();
        let repos = h.controller.cache.tracked_repos(5).await.unwrap().unwrap();
        assert_eq!(repos.target_branch("org/data"), Some("dev"));

        h.controller.on_branch_deleted(ref_event("branch", "dev")).await.unwrap();
        let repos = h.controller.cache.tracked_repos(5).await.unwrap().unwrap();
        assert!(repos.contains("org/data"));
        assert_eq!(repos.target_branch("org/data"), None);
        assert_eq!(h.controller.cache.branches("org/data").await.unwrap().unwrap(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_branch_created_refreshes_list() {
        let dir = tempfile::tempdir().unwrap();
        let h = setup(dir.path());
        h.github.branches.lock().unwrap().insert("org/data".into(), vec!["dev".into(), "feature".into()]);

        h.controller.on_branch_created(ref_event("branch", "feature")).await.unwrap();

        let branches = h.controller.cache.branches("org/data").await.unwrap().unwrap();
        assert_eq!(branches, vec!["dev", "feature"]);
    }
}
