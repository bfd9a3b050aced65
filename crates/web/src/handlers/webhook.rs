use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gcb_ci_core::AppError;
use gcb_ci_github::{
    events::{CheckRunAction, InstallationAction, WebhookEvent},
    webhook::GitHubEvent,
};

use crate::AppState;

/// Accept a delivery, decide its response code and hand the work to the controller.
pub async fn webhook(
    State(state): State<AppState>,
    GitHubEvent { delivery, event }: GitHubEvent,
) -> Result<Response, AppError> {
    let Some(installation_id) = event.installation_id() else {
        tracing::warn!(delivery = delivery.as_deref(), "Received {} event with no installation", event.kind());
        return Err(AppError::Rejected(StatusCode::BAD_REQUEST, "Missing installation"));
    };
    tracing::info!(installation = installation_id, "Received webhook event {}", event.kind());

    let github = &state.controller.github;
    let deleted = matches!(&event, WebhookEvent::Installation(e) if e.action == InstallationAction::Deleted);
    if !deleted {
        github.installation_token(installation_id).await?;
    }

    let status = match &event {
        WebhookEvent::CheckRun(e) if e.check_run.app.id != github.app_id() => {
            tracing::warn!(check_run = e.check_run.id, "Check run belongs to app {}", e.check_run.app.id);
            return Err(AppError::Rejected(StatusCode::UNAUTHORIZED, "Check run belongs to another app"));
        }
        WebhookEvent::CheckRun(e) if e.action == CheckRunAction::Created => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    state.controller.spawn_event(event);
    Ok((status, "Event accepted").into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::Ordering};

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use gcb_ci_cache::RelationCache;
    use gcb_ci_cloud::testing::{FakeBuildService, FakeStorage};
    use gcb_ci_core::config::Config;
    use gcb_ci_github::testing::FakeGitHub;
    use gcb_ci_jobs::{Controller, Supervisor};
    use gcb_ci_source::{SourcePipeline, git::testing::FakeGit};
    use hmac::{Hmac, Mac};
    use serde_json::json;
    use sha2::Sha256;
    use tower::ServiceExt;

    use crate::{AppState, handlers::build_router};

    const CONFIG: &str = r#"
github:
  app_id: 1
  webhook_secret: secret
  private_key_path: app.pem
gcp:
  project_id: proj
  credentials_path: gcs.json
cache:
  kind: memory
build:
  substitution_wait_secs: 0
retry:
  attempts: 1
  base_delay_ms: 0
"#;

    fn setup(dir: &std::path::Path) -> (Router, Arc<FakeGitHub>) {
        let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.build.workdir = dir.to_path_buf();
        let config = Arc::new(config);
        let github = Arc::new(FakeGitHub::default());
        let storage = Arc::new(FakeStorage::default());
        let source = SourcePipeline::new(
            Arc::new(FakeGit::default()),
            storage.clone(),
            config.build.workdir.clone(),
            config.gcp.source_bucket.clone(),
            config.retry.policy().unwrap(),
        );
        let controller = Controller {
            config: config.clone(),
            cache: RelationCache::in_memory(),
            github: github.clone(),
            builds: Arc::new(FakeBuildService::default()),
            storage,
            source: Arc::new(source),
            supervisor: Supervisor::new(),
        };
        (build_router().with_state(AppState { config, controller }), github)
    }

    fn signed(kind: &str, body: &serde_json::Value) -> Request<Body> {
        let body = serde_json::to_vec(body).unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(&body);
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        Request::post("/api/github/webhook")
            .header("X-GitHub-Event", kind)
            .header("X-GitHub-Delivery", "d-1")
            .header("X-Hub-Signature-256", signature)
            .body(Body::from(body))
            .unwrap()
    }

    fn check_run(action: &str, app_id: u64) -> serde_json::Value {
        json!({
            "action": action,
            "check_run": {
                "id": 31,
                "head_sha": "abc1234def",
                "app": { "id": app_id },
                "check_suite": { "head_branch": "feature", "pull_requests": [] },
            },
            "repository": { "id": 7, "name": "data", "full_name": "org/data", "owner": { "login": "org" } },
            "installation": { "id": 5 },
        })
    }

    #[tokio::test]
    async fn test_unsigned_delivery_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = setup(dir.path());
        let request = Request::post("/")
            .header("X-GitHub-Event", "star")
            .body(Body::from(r#"{"installation":{"id":5}}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_installation() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = setup(dir.path());

        let response = router.oneshot(signed("star", &json!({ "action": "created" }))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_run_created_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = setup(dir.path());

        let response = router.oneshot(signed("check_run", &check_run("created", 1))).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_foreign_check_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (router, github) = setup(dir.path());

        let response = router.oneshot(signed("check_run", &check_run("rerequested", 2))).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(github.created_count(), 0);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (router, github) = setup(dir.path());
        github.fail_auth.store(true, Ordering::SeqCst);

        let response = router.clone().oneshot(signed("check_run", &check_run("created", 1))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let deleted = json!({ "action": "deleted", "installation": { "id": 5 } });
        let response = router.oneshot(signed("installation", &deleted)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_events_are_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = setup(dir.path());
        let body = json!({ "action": "created", "installation": { "id": 5 } });

        let response = router.oneshot(signed("star", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
