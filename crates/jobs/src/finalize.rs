use std::path::Path;

use anyhow::{Context, Result};
use gcb_ci_cloud::{ObjectStorage, models::Build};
use gcb_ci_core::{
    models::{AnnotationLevel, RepoStatus},
    retry::RetryPolicy,
};
use gcb_ci_github::checks::Annotation;

use crate::logs::process_log;

/// Download a finished build's log and split it into per-step segments.
///
/// The remote log object and the local copy are removed afterwards.
pub async fn collect_logs(
    storage: &dyn ObjectStorage,
    retry: &RetryPolicy,
    workdir: &Path,
    build: &Build,
) -> Result<Vec<String>> {
    let (bucket, object) = build.log_object().context("Build has no log location")?;
    tokio::fs::create_dir_all(workdir).await?;
    let destination = workdir.join(&object);
    retry
        .run("Log download", |_| storage.download(&bucket, &object, &destination))
        .await
        .with_context(|| format!("Failed to download {object}"))?;
    let raw = tokio::fs::read(&destination)
        .await
        .with_context(|| format!("Failed to read {}", destination.display()))?;
    let logs = process_log(&String::from_utf8_lossy(&raw));

    if let Err(e) = storage.delete(&bucket, &object).await {
        tracing::warn!("Failed to delete {} from {}: {:#}", object, bucket, e);
    }
    if let Err(e) = tokio::fs::remove_file(&destination).await {
        tracing::warn!("Failed to remove {}: {}", destination.display(), e);
    }
    Ok(logs)
}

/// One annotation per build step, anchored to the step's declaration.
pub fn step_annotations(build: &Build, status: &RepoStatus, logs: &[String]) -> Vec<Annotation> {
    let path = status.yaml_file.clone().unwrap_or_default();
    build
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let line = status.step_lines.get(i).copied().unwrap_or(1);
            let detail = if step.status.is_unexecuted() {
                "This step is not executed"
            } else {
                "Logs are available as raw output."
            };
            Annotation {
                path: path.clone(),
                start_line: line,
                end_line: line,
                annotation_level: AnnotationLevel::for_step(step.status),
                message: format!("{}, {}", step.status, detail),
                title: Some(step.name.clone()),
                raw_details: logs.get(i).cloned(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use gcb_ci_cloud::{models::BuildStep, testing::FakeStorage};
    use gcb_ci_core::models::BuildStatus;

    use super::*;

    fn finished_build() -> Build {
        Build {
            id: "b-7".into(),
            status: BuildStatus::Failure,
            logs_bucket: Some("gs://artifacts".into()),
            steps: vec![
                BuildStep { name: "ubuntu".into(), status: BuildStatus::Success, timing: None },
                BuildStep { name: "python".into(), status: BuildStatus::Failure, timing: None },
                BuildStep { name: "deploy".into(), status: BuildStatus::Queued, timing: None },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_collect_logs_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FakeStorage::default().with_object(
            "artifacts",
            "log-b-7.txt",
            "Step #0: ok\nFinished Step #0\nStep #1: boom\nFinished Step #1\n",
        );

        let logs =
            collect_logs(&storage, &RetryPolicy::immediate(2), dir.path(), &finished_build()).await.unwrap();

        assert_eq!(logs, vec!["Step #0: ok\nFinished Step #0\n", "Step #1: boom\nFinished Step #1\n"]);
        assert!(storage.object("artifacts", "log-b-7.txt").is_none());
        assert!(!dir.path().join("log-b-7.txt").exists());
    }

    #[tokio::test]
    async fn test_collect_logs_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FakeStorage::default();
        let result = collect_logs(&storage, &RetryPolicy::immediate(2), dir.path(), &finished_build()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_step_annotations() {
        let status = RepoStatus {
            yaml_file: Some("cloudbuild-pr.yaml".into()),
            step_lines: vec![2, 6],
            ..Default::default()
        };
        let logs = vec!["ok\n".to_string(), "boom\n".to_string()];

        let annotations = step_annotations(&finished_build(), &status, &logs);

        let levels: Vec<_> = annotations.iter().map(|a| a.annotation_level).collect();
        assert_eq!(levels, vec![AnnotationLevel::Notice, AnnotationLevel::Failure, AnnotationLevel::Warning]);
        assert_eq!(annotations[0].start_line, 2);
        assert_eq!(annotations[1].message, "FAILURE, Logs are available as raw output.");
        assert_eq!(annotations[1].raw_details.as_deref(), Some("boom\n"));
        assert_eq!(annotations[2].message, "QUEUED, This step is not executed");
        assert_eq!(annotations[2].start_line, 1);
        assert_eq!(annotations[2].raw_details, None);
        assert!(annotations.iter().all(|a| a.path == "cloudbuild-pr.yaml"));
    }
}
