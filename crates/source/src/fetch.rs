use std::path::Path;

use anyhow::{Context, Result};
use gcb_ci_core::retry::RetryPolicy;

use crate::git::SourceControl;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FetchOutcome {
    /// Both branches were checked out.
    pub fetched: bool,
    pub merged: bool,
}

/// Bring the clone at `dir` up to date and merge `head` into `target`.
///
/// A failed cycle discards the clone and starts over, up to the policy's attempt ceiling.
pub async fn fetch_and_merge(
    git: &dyn SourceControl,
    retry: &RetryPolicy,
    dir: &Path,
    url: &str,
    head: &str,
    target: &str,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    for attempt in 1..=retry.attempts {
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tracing::info!("Using cached clone {}", dir.display());
        } else {
            tracing::info!("Cloning into {}", dir.display());
            let cloned = retry
                .run("Clone", |_| async {
                    let result = git.clone_repo(url, dir).await;
                    if result.is_err() {
                        discard(dir).await;
                    }
                    result
                })
                .await;
            if cloned.is_err() {
                tracing::warn!("Giving up on cloning {}", dir.display());
                return outcome;
            }
        }

        match merge_cycle(git, dir, head, target, &mut outcome).await {
            Ok(()) => {
                tracing::info!("Merged {} into {}", head, target);
                outcome.merged = true;
                return outcome;
            }
            Err(e) => {
                tracing::warn!(
                    "Merge of {} into {} failed (attempt {}/{}): {:#}",
                    head,
                    target,
                    attempt,
                    retry.attempts,
                    e
                );
                discard(dir).await;
                if attempt < retry.attempts {
                    tokio::time::sleep(retry.delay(attempt)).await;
                }
            }
        }
    }
    tracing::warn!("Too many merge attempts for {} into {}", head, target);
    outcome
}

/// Remove a clone directory; a clone that never got created is not an error.
async fn discard(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("Discarded {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to discard {}: {}", dir.display(), e),
    }
}

async fn merge_cycle(
    git: &dyn SourceControl,
    dir: &Path,
    head: &str,
    target: &str,
    outcome: &mut FetchOutcome,
) -> Result<()> {
    git.update(dir).await.context("Failed to refresh clone")?;
    git.checkout(dir, head).await?;
    git.checkout(dir, target).await?;
    outcome.fetched = true;
    git.merge(dir, head).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::git::testing::FakeGit;

    #[tokio::test]
    async fn test_merge_retries_with_fresh_clone() {
        let dir = tempfile::tempdir().unwrap();
        let clone = dir.path().join("data");
        let git = FakeGit::default().with_file("README.md", "hi");
        git.merge_failures.store(2, Ordering::SeqCst);

        let outcome =
            fetch_and_merge(&git, &RetryPolicy::immediate(5), &clone, "url", "feature", "dev").await;

        assert_eq!(outcome, FetchOutcome { fetched: true, merged: true });
        assert_eq!(git.clone_count(), 3);
        assert_eq!(git.merges.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_merge_conflict_exhausts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let clone = dir.path().join("data");
        let git = FakeGit::default();
        git.merge_failures.store(u32::MAX, Ordering::SeqCst);

        let outcome =
            fetch_and_merge(&git, &RetryPolicy::immediate(5), &clone, "url", "feature", "dev").await;

        assert_eq!(outcome, FetchOutcome { fetched: true, merged: false });
        assert_eq!(git.merges.lock().unwrap().len(), 5);
        assert!(!clone.exists());
    }

    #[tokio::test]
    async fn test_unreachable_repository() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        git.clone_failures.store(u32::MAX, Ordering::SeqCst);

        let outcome = fetch_and_merge(
            &git,
            &RetryPolicy::immediate(3),
            &dir.path().join("data"),
            "url",
            "feature",
            "dev",
        )
        .await;

        assert_eq!(outcome, FetchOutcome::default());
        assert_eq!(git.clone_failures.load(Ordering::SeqCst), u32::MAX - 3);
        assert!(!dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_discard_removes_partial_clone() {
        let dir = tempfile::tempdir().unwrap();
        let clone = dir.path().join("data");
        std::fs::create_dir_all(clone.join(".git")).unwrap();
        std::fs::write(clone.join(".git/HEAD"), "ref: refs/heads/dev\n").unwrap();

        discard(&clone).await;
        assert!(!clone.exists());
        // Already gone: nothing to remove.
        discard(&clone).await;
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_missing_branch_is_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit { fail_checkout: true, ..Default::default() };

        let outcome = fetch_and_merge(
            &git,
            &RetryPolicy::immediate(2),
            &dir.path().join("data"),
            "url",
            "feature",
            "dev",
        )
        .await;

        assert_eq!(outcome, FetchOutcome::default());
        assert_eq!(git.clone_count(), 2);
    }
}
