pub mod config;
pub mod models;
pub mod retry;
pub mod util;

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Handler error: a deliberate rejection, invalid settings, or an internal failure reported as 500.
#[derive(Debug)]
pub enum AppError {
    Rejected(StatusCode, &'static str),
    Config(String),
    Internal(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(status, message) => write!(f, "{message} ({status})"),
            Self::Config(message) => write!(f, "Invalid configuration: {message}"),
            Self::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(status, message) => {
                tracing::warn!("Rejected request ({}): {}", status, message);
                (status, message).into_response()
            }
            Self::Config(message) => {
                tracing::error!("Invalid configuration: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid configuration").into_response()
            }
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}")).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self::Internal(err.into()) }
}
