use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use gcp_auth::{CustomServiceAccount, TokenProvider};

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// OAuth access tokens for the Google APIs. The provider caches and refreshes them.
#[derive(Clone)]
pub struct GoogleAuth {
    provider: Arc<dyn TokenProvider>,
}

impl GoogleAuth {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self { Self { provider } }

    /// Authenticate as the service account in a JSON key file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let account = CustomServiceAccount::from_file(path)
            .with_context(|| format!("Failed to load service account key {}", path.display()))?;
        tracing::info!("Loaded service account key {}", path.display());
        Ok(Self::new(Arc::new(account)))
    }

    pub async fn token(&self) -> Result<String> {
        let token = self.provider.token(SCOPES).await.context("Failed to obtain access token")?;
        Ok(token.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = GoogleAuth::from_file(&dir.path().join("gcs.json")).err().unwrap();
        assert!(format!("{err:#}").contains("gcs.json"));
    }

    #[test]
    fn test_malformed_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcs.json");
        std::fs::write(&path, "{\"type\": \"service_account\"}").unwrap();
        assert!(GoogleAuth::from_file(&path).is_err());
    }
}
