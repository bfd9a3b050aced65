//! Source preparation: fetch and merge a pull request, find its build configuration,
//! package the merged tree and upload it for the build service.

pub mod archive;
pub mod discovery;
pub mod fetch;
pub mod git;
pub mod upload;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use gcb_ci_cloud::ObjectStorage;
use gcb_ci_core::{models::RepoStatus, retry::RetryPolicy};
pub use git::{GitCli, SourceControl};

/// What to prepare: `head_branch` merged into `target_branch` of `full_name`.
#[derive(Debug, Clone, Copy)]
pub struct SourceRequest<'a> {
    pub full_name: &'a str,
    pub repo_name: &'a str,
    pub token: &'a str,
    pub head_branch: &'a str,
    pub target_branch: &'a str,
}

pub struct SourcePipeline {
    git: Arc<dyn SourceControl>,
    storage: Arc<dyn ObjectStorage>,
    workdir: PathBuf,
    bucket: String,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourcePipeline {
    pub fn new(
        git: Arc<dyn SourceControl>,
        storage: Arc<dyn ObjectStorage>,
        workdir: PathBuf,
        bucket: String,
        retry: RetryPolicy,
    ) -> Self {
        Self { git, storage, workdir, bucket, retry, locks: Mutex::default() }
    }

    pub fn workdir(&self) -> &Path { &self.workdir }

    pub fn retry(&self) -> &RetryPolicy { &self.retry }

    fn repo_lock(&self, repo_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(repo_name.to_string()).or_default().clone()
    }

    /// Run every stage in order, stopping at the first failure.
    ///
    /// Runs for the same repository name are serialized, since they share one clone.
    pub async fn process_repo(&self, request: SourceRequest<'_>) -> RepoStatus {
        let lock = self.repo_lock(request.repo_name);
        let _guard = lock.lock().await;
        let mut status = RepoStatus::default();

        if let Err(e) = tokio::fs::create_dir_all(&self.workdir).await {
            tracing::error!("Failed to create {}: {}", self.workdir.display(), e);
            return status;
        }
        let dir = self.workdir.join(request.repo_name);
        let url = git::authenticated_url(request.token, request.full_name);
        let outcome = fetch::fetch_and_merge(
            self.git.as_ref(),
            &self.retry,
            &dir,
            &url,
            request.head_branch,
            request.target_branch,
        )
        .await;
        status.fetched = outcome.fetched;
        status.merged = outcome.merged;
        if !status.merged {
            return status;
        }

        let discovered = match discovery::find_config(&dir).await {
            Ok(Some(discovered)) => discovered,
            Ok(None) => {
                tracing::info!("No build configuration in {}", request.full_name);
                return status;
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                status.yaml_found = true;
                return status;
            }
        };
        status.yaml_found = true;
        status.yaml_file = Some(discovered.file.clone());
        match discovered.parse() {
            Ok(config) => status.config = Some(config),
            Err(e) => {
                tracing::error!("{:#}", e);
                return status;
            }
        }
        status.step_lines = discovered.step_lines();
        if status.step_lines.is_empty() {
            tracing::warn!("{} declares no steps", discovered.file);
            return status;
        }
        tracing::info!("Processed {} ({} steps)", discovered.file, status.step_lines.len());

        let name = archive::archive_name(request.repo_name, request.target_branch);
        let archive_path = self.workdir.join(&name);
        if let Err(e) = archive::create_archive(&dir, &archive_path).await {
            tracing::error!("Failed to create {}: {:#}", name, e);
            return status;
        }
        tracing::info!("Created {}", name);
        status.tar_created = true;
        status.archive_name = Some(name.clone());

        let uploaded = self
            .retry
            .run("Upload", |_| {
                upload::upload_archive(self.storage.as_ref(), &self.bucket, &archive_path, &name)
            })
            .await;
        match uploaded {
            Ok(uploaded) => {
                tracing::info!("Uploaded {}", uploaded.uri);
                status.uploaded = true;
                status.bucket = Some(uploaded.bucket);
                status.object = Some(uploaded.object);
                status.object_uri = Some(uploaded.uri);
                status.completed = true;
            }
            Err(e) => tracing::error!("Failed to upload {}: {:#}", name, e),
        }
        status
    }
}
