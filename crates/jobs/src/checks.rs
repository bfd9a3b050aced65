use std::time::Duration;

use anyhow::{Context, Result};
use gcb_ci_cache::{Association, pull_request_key};
use gcb_ci_cloud::models::Build;
use gcb_ci_core::models::{Conclusion, RepoStatus, Substitutions};
use gcb_ci_github::{
    RepoRef,
    checks::{CheckRunOutput, CheckRunRequest, MAX_ANNOTATIONS},
    events::{CheckRunEvent, PullRequestAction, PullRequestEvent, Repository},
};
use gcb_ci_source::SourceRequest;
use tokio::time::Instant;

use crate::{
    Controller,
    abort::{AbortReason, PULL_REQUEST_NOT_FOUND, REPO_NOT_TRACKED, abort_outcome},
    build::{PollOutcome, PollSettings, poll, prepare_definition, trigger},
    finalize::{collect_logs, step_annotations},
    summary::{build_summary, progress_summary},
};

const IN_PROGRESS_SUMMARY: &str = "Changes are being processed by CI server.";
const SUBSTITUTION_POLL: Duration = Duration::from_millis(500);

fn repo_ref(repository: &Repository) -> RepoRef {
    RepoRef::new(&repository.owner.login, &repository.name)
}

impl Controller {
    fn substitutions_for(&self, event: &PullRequestEvent) -> Substitutions {
        let pr = &event.pull_request;
        let mut substitutions = Substitutions::new(
            &pr.head.sha,
            &event.repository.name,
            &pr.head.ref_name,
            &pr.base.ref_name,
            pr.number,
        );
        if let Some(repo) = self.config.repo(&event.repository.name)
            && repo.target_branch.as_deref() == Some(pr.base.ref_name.as_str())
        {
            substitutions.extra.extend(repo.substitutions.clone());
        }
        substitutions
    }

    pub(crate) async fn on_pull_request(&self, event: PullRequestEvent) -> Result<()> {
        let installation_id = event.installation.as_ref().map(|i| i.id).context("Missing installation")?;
        let pr = &event.pull_request;
        match event.action {
            PullRequestAction::Opened | PullRequestAction::Reopened | PullRequestAction::Synchronize => {
                let Some(repos) = self.cache.tracked_repos(installation_id).await? else {
                    tracing::warn!(installation = installation_id, "Backend not initialised, ignoring pull request");
                    return Ok(());
                };
                let full_name = &event.repository.full_name;
                let target = self.target_branch(&repos, full_name, &event.repository.name);
                if target.as_deref() != Some(pr.base.ref_name.as_str()) {
                    tracing::debug!("Pull request #{} on {} does not target an integration branch", pr.number, full_name);
                    return Ok(());
                }
                let substitutions = self.substitutions_for(&event);
                self.cache.set_substitutions(installation_id, pr.id, &substitutions).await?;
                tracing::info!(installation = installation_id, "Saved substitutions for pull request #{} on {}", pr.number, full_name);

                if self.cache.head_requested(&pr.head.sha).await? {
                    tracing::info!("Check run already requested for {}", pr.head.sha);
                    return Ok(());
                }
                let repo = repo_ref(&event.repository);
                let check_run = self
                    .github
                    .create_check_run(installation_id, &repo, &CheckRunRequest::create(self.check_name(), &pr.head.sha))
                    .await?;
                self.cache
                    .associate(installation_id, check_run.id, &pull_request_key(installation_id, pr.id))
                    .await?;
                self.cache.mark_head_requested(&pr.head.sha).await?;
            }
            PullRequestAction::Closed => {
                let removed = self.cache.delete_pull_request(installation_id, pr.id).await?;
                tracing::info!(installation = installation_id, "Deleted pull request {} ({} check runs)", pr.id, removed);
            }
            PullRequestAction::Other => {}
        }
        Ok(())
    }

    /// Pull request of a re-requested check run: the original association, or the first
    /// pull request in the check suite whose cached substitutions match it.
    async fn resolve_rerequest(&self, installation_id: u64, event: &CheckRunEvent) -> Result<Option<String>> {
        if let Some(key) = self.cache.association(installation_id, event.check_run.id).await? {
            return Ok(Some(key));
        }
        for pr in &event.check_run.check_suite.pull_requests {
            let key = pull_request_key(installation_id, pr.id);
            if let Some(substitutions) = self.cache.substitutions(&key).await?
                && substitutions.matches(&event.repository.name, &pr.head.ref_name, &pr.base.ref_name, pr.number)
            {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    pub(crate) async fn on_check_run_rerequested(&self, event: CheckRunEvent) -> Result<()> {
        let installation_id = event.installation.as_ref().map(|i| i.id).context("Missing installation")?;
        let head_sha = &event.check_run.head_sha;
        let repo = repo_ref(&event.repository);
        let check_run = self
            .github
            .create_check_run(installation_id, &repo, &CheckRunRequest::create(self.check_name(), head_sha))
            .await?;
        match self.resolve_rerequest(installation_id, &event).await? {
            Some(key) => {
                if self.cache.associate(installation_id, check_run.id, &key).await? == Association::Conflict {
                    tracing::warn!(check_run = check_run.id, "Re-requested check run kept its existing association");
                }
            }
            None => tracing::warn!(
                installation = installation_id,
                check_run = event.check_run.id,
                "No pull request found for re-requested check run"
            ),
        }
        self.cache.mark_head_requested(head_sha).await?;
        Ok(())
    }

    /// Substitutions of the pull request a check run belongs to, waiting for the concurrent
    /// creation flow to record the association.
    async fn wait_for_substitutions(&self, installation_id: u64, check_run_id: u64) -> Result<Option<Substitutions>> {
        let deadline = Instant::now() + self.config.build.substitution_wait();
        loop {
            if let Some(key) = self.cache.association(installation_id, check_run_id).await?
                && let Some(substitutions) = self.cache.substitutions(&key).await?
            {
                return Ok(Some(substitutions));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SUBSTITUTION_POLL.min(deadline - now)).await;
        }
    }

    async fn update(&self, installation_id: u64, repo: &RepoRef, check_run_id: u64, request: &CheckRunRequest) -> Result<()> {
        tracing::debug!(check_run = check_run_id, status = ?request.status, "Updating check run");
        self.github.update_check_run(installation_id, repo, check_run_id, request).await
    }

    async fn abort(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        check_run_id: u64,
        status: &RepoStatus,
        reason: AbortReason,
    ) -> Result<()> {
        let (conclusion, summary) = abort_outcome(status, &reason);
        tracing::info!(check_run = check_run_id, "Terminating check run with conclusion {}", conclusion);
        self.update(installation_id, repo, check_run_id, &CheckRunRequest::completed(conclusion, self.output(summary)))
            .await
    }

    /// Drive a freshly created check run through the pipeline, the build and the final report.
    pub(crate) async fn initiate_build(&self, event: CheckRunEvent) -> Result<()> {
        let installation_id = event.installation.as_ref().map(|i| i.id).context("Missing installation")?;
        let repo = repo_ref(&event.repository);
        let check_run_id = event.check_run.id;
        let mut status = RepoStatus::default();
        if let Err(e) = self.run_build(installation_id, &repo, &event, &mut status).await {
            tracing::error!(check_run = check_run_id, "Build failed unexpectedly: {:?}", e);
            self.abort(installation_id, &repo, check_run_id, &status, AbortReason::Forced).await?;
        }
        Ok(())
    }

    async fn run_build(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        event: &CheckRunEvent,
        status: &mut RepoStatus,
    ) -> Result<()> {
        let check_run_id = event.check_run.id;
        let Some(substitutions) = self.wait_for_substitutions(installation_id, check_run_id).await? else {
            tracing::warn!(check_run = check_run_id, "No pull request associated with check run");
            return self
                .abort(installation_id, repo, check_run_id, status, AbortReason::NotFound(PULL_REQUEST_NOT_FOUND))
                .await;
        };
        self.update(installation_id, repo, check_run_id, &CheckRunRequest::in_progress(self.output(IN_PROGRESS_SUMMARY)))
            .await?;

        let repos = self.cache.tracked_repos(installation_id).await?.unwrap_or_default();
        let full_name = event.repository.full_name.as_str();
        let Some(target_branch) = self.target_branch(&repos, full_name, &repo.name) else {
            return self
                .abort(installation_id, repo, check_run_id, status, AbortReason::NotFound(REPO_NOT_TRACKED))
                .await;
        };
        let head_branch = event.check_run.check_suite.head_branch.as_deref().unwrap_or(&substitutions.head_branch);
        let token = self.github.installation_token(installation_id).await?;
        tracing::info!(check_run = check_run_id, "Preparing {} ({} into {})", full_name, head_branch, target_branch);
        *status = self
            .source
            .process_repo(SourceRequest {
                full_name,
                repo_name: &repo.name,
                token: &token,
                head_branch,
                target_branch: &target_branch,
            })
            .await;
        if !status.completed {
            return self.abort(installation_id, repo, check_run_id, status, AbortReason::Pipeline).await;
        }

        let (Some(config), Some(bucket), Some(object)) = (&status.config, &status.bucket, &status.object) else {
            return self.abort(installation_id, repo, check_run_id, status, AbortReason::Pipeline).await;
        };
        let definition = prepare_definition(config, &substitutions, bucket, object);
        let Some(build) = trigger(self.builds.as_ref(), self.source.retry(), &definition).await else {
            return self.abort(installation_id, repo, check_run_id, status, AbortReason::Pipeline).await;
        };
        status.triggered = true;

        let token = self.supervisor.token();
        let settings = PollSettings {
            interval: self.config.build.poll_interval(),
            budget: self.config.build.poll_timeout(),
            retry: self.source.retry(),
            token: &token,
        };
        let outcome = poll(self.builds.as_ref(), build, settings, |build| async move {
            let request = CheckRunRequest::progress(self.output(progress_summary(&build)))
                .with_details_url(build.log_url.clone());
            if let Err(e) = self.update(installation_id, repo, check_run_id, &request).await {
                tracing::warn!(check_run = check_run_id, "Failed to publish progress: {:#}", e);
            }
        })
        .await;
        match outcome {
            PollOutcome::Finished(build) => self.finalize(installation_id, repo, check_run_id, &build, status).await,
            PollOutcome::TimedOut(build) => {
                let summary = format!(
                    "{}\nBuild did not finish within {} seconds.",
                    progress_summary(&build),
                    self.config.build.poll_timeout_secs
                );
                self.complete_early(installation_id, repo, check_run_id, &build, Conclusion::TimedOut, summary).await
            }
            PollOutcome::Cancelled(build) => {
                let summary = format!("{}\nCI server stopped before the build finished.", progress_summary(&build));
                self.complete_early(installation_id, repo, check_run_id, &build, Conclusion::Cancelled, summary).await
            }
            PollOutcome::Unavailable(e) => Err(e.context("Lost track of build")),
        }
    }

    async fn complete_early(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        check_run_id: u64,
        build: &Build,
        conclusion: Conclusion,
        summary: String,
    ) -> Result<()> {
        let request =
            CheckRunRequest::completed(conclusion, self.output(summary)).with_details_url(build.log_url.clone());
        self.update(installation_id, repo, check_run_id, &request).await
    }

    /// Publish the terminal report: conclusion, summary and one annotation per step.
    async fn finalize(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        check_run_id: u64,
        build: &Build,
        status: &RepoStatus,
    ) -> Result<()> {
        let logs = match collect_logs(self.storage.as_ref(), self.source.retry(), self.source.workdir(), build)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                tracing::error!(build = %build.id, "Failed to process logs: {:#}", e);
                return self.abort(installation_id, repo, check_run_id, status, AbortReason::Forced).await;
            }
        };
        let conclusion = build.status.conclusion().unwrap_or(Conclusion::Failure);
        let annotations = step_annotations(build, status, &logs);
        let summary = build_summary(build);
        let mut batches = annotations.chunks(MAX_ANNOTATIONS);

        let output = CheckRunOutput {
            annotations: batches.next().map(<[_]>::to_vec).unwrap_or_default(),
            ..self.output(summary.clone())
        };
        let request = CheckRunRequest::completed(conclusion, output).with_details_url(build.log_url.clone());
        self.update(installation_id, repo, check_run_id, &request).await?;
        for batch in batches {
            let output = CheckRunOutput { annotations: batch.to_vec(), ..self.output(summary.clone()) };
            self.update(installation_id, repo, check_run_id, &CheckRunRequest::progress(output)).await?;
        }
        tracing::info!(check_run = check_run_id, build = %build.id, "Check run completed with conclusion {}", conclusion);
        Ok(())
    }
}
