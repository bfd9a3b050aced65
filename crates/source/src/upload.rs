use std::path::Path;

use anyhow::{Context, Result};
use gcb_ci_cloud::ObjectStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub object: String,
    pub uri: String,
}

/// Upload an archive to `bucket`, creating the bucket first if it does not exist.
pub async fn upload_archive(
    storage: &dyn ObjectStorage,
    bucket: &str,
    archive: &Path,
    object: &str,
) -> Result<UploadedObject> {
    let buckets = storage.list_buckets().await.context("Failed to list buckets")?;
    if buckets.iter().any(|b| b == bucket) {
        tracing::debug!("Bucket {} found", bucket);
    } else {
        tracing::info!("Bucket {} not found, creating it", bucket);
        storage.create_bucket(bucket).await?;
    }
    tracing::info!("Uploading {} to {}", object, bucket);
    storage.upload(bucket, object, archive, "no-cache").await?;
    Ok(UploadedObject {
        bucket: bucket.to_string(),
        object: object.to_string(),
        uri: format!("gs://{bucket}/{object}"),
    })
}

#[cfg(test)]
mod tests {
    use gcb_ci_cloud::testing::FakeStorage;

    use super::*;

    #[tokio::test]
    async fn test_upload_creates_missing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data_dev.tar.gz");
        std::fs::write(&archive, b"archive").unwrap();
        let storage = FakeStorage::default();

        let uploaded = upload_archive(&storage, "artifacts", &archive, "data_dev.tar.gz").await.unwrap();

        assert_eq!(uploaded.uri, "gs://artifacts/data_dev.tar.gz");
        assert!(storage.buckets.lock().unwrap().contains("artifacts"));
        assert_eq!(storage.object("artifacts", "data_dev.tar.gz").as_deref(), Some(&b"archive"[..]));
        let key = ("artifacts".to_string(), "data_dev.tar.gz".to_string());
        assert_eq!(storage.cache_control.lock().unwrap()[&key], "no-cache");
    }
}
