use axum::{Router, routing::post};

use crate::AppState;

mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", post(webhook::webhook))
        .route("/api/github/webhook", post(webhook::webhook))
}
