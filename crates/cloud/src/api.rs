use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::GoogleAuth;

#[derive(Debug, thiserror::Error)]
#[error("{url} returned {status}: {message}")]
pub struct ApiError {
    pub url: String,
    pub status: StatusCode,
    pub message: String,
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>().is_some_and(|e| e.status == StatusCode::NOT_FOUND)
}

/// Authenticated JSON client shared by the Google API wrappers.
#[derive(Clone)]
pub struct GoogleApi {
    http: reqwest::Client,
    auth: GoogleAuth,
}

impl GoogleApi {
    pub fn new(http: reqwest::Client, auth: GoogleAuth) -> Self { Self { http, auth } }

    pub async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.auth.token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.context("Request failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let message = response.text().await.unwrap_or_default();
        Err(ApiError { url, status, message }.into())
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let url = response.url().to_string();
        response.json().await.with_context(|| format!("Malformed response from {url}"))
    }
}

/// Append percent-encoded path segments to a base URL.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid base URL {base}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Base URL {base} cannot have a path"))?
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint("https://storage.googleapis.com/storage/v1", &["b", "bucket", "o", "dir/log 1.txt"])
            .unwrap();
        assert_eq!(url.as_str(), "https://storage.googleapis.com/storage/v1/b/bucket/o/dir%2Flog%201.txt");
    }

    #[test]
    fn test_not_found_detection() {
        let err: anyhow::Error = ApiError {
            url: "https://example.com".into(),
            status: StatusCode::NOT_FOUND,
            message: String::new(),
        }
        .into();
        assert!(is_not_found(&err));
        assert!(!is_not_found(&anyhow::anyhow!("other")));
    }
}
