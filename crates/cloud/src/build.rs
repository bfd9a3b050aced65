use anyhow::{Context, Result};
use async_trait::async_trait;
use gcb_ci_core::models::BuildDefinition;
use reqwest::Method;
use serde::Deserialize;

use crate::{
    api::{GoogleApi, endpoint},
    models::Build,
};

const CLOUD_BUILD_API: &str = "https://cloudbuild.googleapis.com/v1";

#[async_trait]
pub trait BuildService: Send + Sync {
    /// Submit a build and return its initial state.
    async fn create_build(&self, definition: &BuildDefinition) -> Result<Build>;

    async fn get_build(&self, id: &str) -> Result<Build>;
}

#[derive(Deserialize)]
struct Operation {
    metadata: OperationMetadata,
}

#[derive(Deserialize)]
struct OperationMetadata {
    build: Build,
}

pub struct CloudBuild {
    api: GoogleApi,
    project_id: String,
}

impl CloudBuild {
    pub fn new(api: GoogleApi, project_id: impl Into<String>) -> Self {
        Self { api, project_id: project_id.into() }
    }
}

#[async_trait]
impl BuildService for CloudBuild {
    async fn create_build(&self, definition: &BuildDefinition) -> Result<Build> {
        let url = endpoint(CLOUD_BUILD_API, &["projects", &self.project_id, "builds"])?;
        let request = self.api.request(Method::POST, url).await?.json(definition);
        let operation: Operation =
            self.api.send_json(request).await.context("Failed to create build")?;
        Ok(operation.metadata.build)
    }

    async fn get_build(&self, id: &str) -> Result<Build> {
        let url = endpoint(CLOUD_BUILD_API, &["projects", &self.project_id, "builds", id])?;
        let request = self.api.request(Method::GET, url).await?;
        self.api.send_json(request).await.with_context(|| format!("Failed to fetch build {id}"))
    }
}
