use std::{fmt::Display, sync::Arc};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use gcb_ci_core::config::Config;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::events::WebhookEvent;

/// Verified and parsed GitHub webhook delivery.
#[derive(Clone, Debug)]
#[must_use]
pub struct GitHubEvent {
    pub delivery: Option<String>,
    pub event: WebhookEvent,
}

fn reject(status: StatusCode, m: impl Display) -> Response {
    tracing::error!("Rejected webhook: {m}");
    (status, m.to_string()).into_response()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Check an `X-Hub-Signature-256` header value against the HMAC of `body`.
pub fn verify_signature(secret: &str, header: &str, body: &[u8]) -> Result<(), &'static str> {
    let signature = header.strip_prefix("sha256=").ok_or("X-Hub-Signature-256 sha256= prefix missing")?;
    let signature = hex::decode(signature).map_err(|_| "X-Hub-Signature-256 malformed")?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "invalid webhook secret")?;
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| "signature mismatch")
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let kind = header(&parts.headers, "X-GitHub-Event")
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "X-GitHub-Event header missing"))?;
        let delivery = header(&parts.headers, "X-GitHub-Delivery");
        let signature = header(&parts.headers, "X-Hub-Signature-256")
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "X-Hub-Signature-256 missing"))?;
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(|_| reject(StatusCode::BAD_REQUEST, "error reading body"))?;
        verify_signature(&config.github.webhook_secret, &signature, &body)
            .map_err(|m| reject(StatusCode::UNAUTHORIZED, m))?;
        let event = WebhookEvent::parse(&kind, &body)
            .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
        tracing::debug!(delivery = delivery.as_deref(), "Received {} event", event.kind());
        Ok(GitHubEvent { delivery, event })
    }
}
