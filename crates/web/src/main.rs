mod handlers;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{Request, StatusCode},
};
use gcb_ci_cache::RelationCache;
use gcb_ci_cloud::ObjectStorage;
use gcb_ci_core::config::Config;
use gcb_ci_github::GitHubApp;
use gcb_ci_jobs::{Controller, Supervisor};
use gcb_ci_source::{GitCli, SourcePipeline};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::build_router;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    controller: Controller,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).with(env_filter).init();

    let config_path = std::env::var("GCB_CI_CONFIG").unwrap_or_else(|_| "config.yml".to_string());
    let config = Arc::new(Config::load(&config_path).expect("Failed to load config"));
    let controller = connect(config.clone()).await.expect("Failed to set up clients");
    let supervisor = controller.supervisor.clone();
    let state = AppState { config: config.clone(), controller };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    tracing::info!("Web server: Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.expect("bind error");
    let router = app(state).into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")
    {
        tracing::error!("{e}");
    }
    tracing::info!("Web server stopped");

    supervisor.shutdown().await;
    tracing::info!("Shut down gracefully");
}

/// Construct every external client once and wire them into the controller.
async fn connect(config: Arc<Config>) -> anyhow::Result<Controller> {
    let github = GitHubApp::new(&config.github).context("Failed to create GitHub client")?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("gcb-ci/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;
    let (builds, storage) = gcb_ci_cloud::connect(&config.gcp.credentials_path, &config.gcp.project_id, http)
        .context("Failed to create Google Cloud clients")?;
    let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
    let cache = RelationCache::connect(&config.cache).await?;
    let source = SourcePipeline::new(
        Arc::new(GitCli::default()),
        storage.clone(),
        config.build.workdir.clone(),
        config.gcp.source_bucket.clone(),
        config.retry.policy().map_err(anyhow::Error::msg)?,
    );
    Ok(Controller {
        config,
        cache,
        github: Arc::new(github),
        builds: Arc::new(builds),
        storage,
        source: Arc::new(source),
        supervisor: Supervisor::new(),
    })
}

fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DeliverySpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

/// Request span carrying the client address and the GitHub delivery id.
#[derive(Debug, Clone)]
pub struct DeliverySpan {
    level: Level,
}

impl<B> MakeSpan<B> for DeliverySpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let forwarded = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        let ip = forwarded
            .or_else(|| request.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0.ip()))
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let delivery = request
            .headers()
            .get("X-GitHub-Delivery")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[none]");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    delivery = %delivery,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
