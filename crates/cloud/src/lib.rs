//! Clients for Cloud Build and Cloud Storage, authenticated with a service-account key.

pub mod api;
pub mod auth;
pub mod build;
pub mod models;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::path::Path;

use anyhow::Result;
pub use api::GoogleApi;
pub use auth::GoogleAuth;
pub use build::{BuildService, CloudBuild};
pub use storage::{CloudStorage, ObjectStorage};

/// Build both service clients from one credentials file.
pub fn connect(
    credentials_path: &Path,
    project_id: &str,
    http: reqwest::Client,
) -> Result<(CloudBuild, CloudStorage)> {
    let auth = GoogleAuth::from_file(credentials_path)?;
    let api = GoogleApi::new(http, auth);
    Ok((CloudBuild::new(api.clone(), project_id), CloudStorage::new(api, project_id)))
}
