use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, header};
use serde::Deserialize;
use serde_json::json;

use crate::api::{GoogleApi, endpoint, is_not_found};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn upload(&self, bucket: &str, object: &str, source: &Path, cache_control: &str) -> Result<()>;

    async fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()>;

    async fn delete(&self, bucket: &str, object: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(default)]
    items: Vec<BucketItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct BucketItem {
    name: String,
}

pub struct CloudStorage {
    api: GoogleApi,
    project_id: String,
}

impl CloudStorage {
    pub fn new(api: GoogleApi, project_id: impl Into<String>) -> Self {
        Self { api, project_id: project_id.into() }
    }
}

#[async_trait]
impl ObjectStorage for CloudStorage {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = endpoint(STORAGE_API, &["b"])?;
            url.query_pairs_mut().append_pair("project", &self.project_id);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let request = self.api.request(Method::GET, url).await?;
            let page: BucketList =
                self.api.send_json(request).await.context("Failed to list buckets")?;
            buckets.extend(page.items.into_iter().map(|b| b.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(buckets)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut url = endpoint(STORAGE_API, &["b"])?;
        url.query_pairs_mut().append_pair("project", &self.project_id);
        let request = self.api.request(Method::POST, url).await?.json(&json!({ "name": bucket }));
        self.api.send(request).await.with_context(|| format!("Failed to create bucket {bucket}"))?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, source: &Path, cache_control: &str) -> Result<()> {
        let data = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let mut url = endpoint(UPLOAD_API, &["b", bucket, "o"])?;
        url.query_pairs_mut().append_pair("uploadType", "media").append_pair("name", object);
        let request = self
            .api
            .request(Method::POST, url)
            .await?
            .header(header::CONTENT_TYPE, "application/gzip")
            .body(data);
        self.api.send(request).await.with_context(|| format!("Failed to upload {bucket}/{object}"))?;

        let url = endpoint(STORAGE_API, &["b", bucket, "o", object])?;
        let request =
            self.api.request(Method::PATCH, url).await?.json(&json!({ "cacheControl": cache_control }));
        self.api
            .send(request)
            .await
            .with_context(|| format!("Failed to set metadata on {bucket}/{object}"))?;
        Ok(())
    }

    async fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()> {
        let mut url = endpoint(STORAGE_API, &["b", bucket, "o", object])?;
        url.query_pairs_mut().append_pair("alt", "media");
        let request = self.api.request(Method::GET, url).await?;
        let response = self
            .api
            .send(request)
            .await
            .with_context(|| format!("Failed to download {bucket}/{object}"))?;
        let bytes = response.bytes().await.context("Failed to read object body")?;
        tokio::fs::write(destination, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", destination.display()))
    }

    async fn delete(&self, bucket: &str, object: &str) -> Result<()> {
        let url = endpoint(STORAGE_API, &["b", bucket, "o", object])?;
        let request = self.api.request(Method::DELETE, url).await?;
        match self.api.send(request).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                tracing::debug!("{}/{} already deleted", bucket, object);
                Ok(())
            }
            Err(e) => Err(e.context(format!("Failed to delete {bucket}/{object}"))),
        }
    }
}
