//! In-process stand-ins for the Google services.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::Path,
    sync::Mutex,
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use gcb_ci_core::models::BuildDefinition;

use crate::{build::BuildService, models::Build, storage::ObjectStorage};

/// Returns scripted builds: `create_build` yields `created`, each `get_build` pops the next
/// polled state and repeats the last one once the script runs out.
#[derive(Default)]
pub struct FakeBuildService {
    pub created: Mutex<Option<Build>>,
    pub polls: Mutex<VecDeque<Result<Build, String>>>,
    pub submitted: Mutex<Vec<BuildDefinition>>,
    pub create_failures: Mutex<u32>,
    last: Mutex<Option<Build>>,
}

impl FakeBuildService {
    pub fn new(created: Build, polls: impl IntoIterator<Item = Build>) -> Self {
        Self {
            created: Mutex::new(Some(created)),
            polls: Mutex::new(polls.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    pub fn submitted(&self) -> Vec<BuildDefinition> { self.submitted.lock().unwrap().clone() }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn create_build(&self, definition: &BuildDefinition) -> Result<Build> {
        self.submitted.lock().unwrap().push(definition.clone());
        {
            let mut failures = self.create_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                bail!("build service unavailable");
            }
        }
        self.created.lock().unwrap().clone().ok_or_else(|| anyhow!("no build scripted"))
    }

    async fn get_build(&self, _id: &str) -> Result<Build> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(build)) => {
                *self.last.lock().unwrap() = Some(build.clone());
                Ok(build)
            }
            Some(Err(message)) => Err(anyhow!(message)),
            None => self.last.lock().unwrap().clone().ok_or_else(|| anyhow!("no build scripted")),
        }
    }
}

/// Object store backed by a map of `(bucket, object)` to contents.
#[derive(Default)]
pub struct FakeStorage {
    pub buckets: Mutex<BTreeSet<String>>,
    pub objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    pub cache_control: Mutex<BTreeMap<(String, String), String>>,
    pub fail_uploads: Mutex<bool>,
}

impl FakeStorage {
    pub fn with_object(self, bucket: &str, object: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        self.objects.lock().unwrap().insert((bucket.to_string(), object.to_string()), contents.into());
        self
    }

    pub fn object(&self, bucket: &str, object: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(&(bucket.to_string(), object.to_string())).cloned()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.buckets.lock().unwrap().iter().cloned().collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, source: &Path, cache_control: &str) -> Result<()> {
        if *self.fail_uploads.lock().unwrap() {
            bail!("upload rejected");
        }
        if !self.buckets.lock().unwrap().contains(bucket) {
            bail!("bucket {bucket} does not exist");
        }
        let data = tokio::fs::read(source).await?;
        let key = (bucket.to_string(), object.to_string());
        self.objects.lock().unwrap().insert(key.clone(), data);
        self.cache_control.lock().unwrap().insert(key, cache_control.to_string());
        Ok(())
    }

    async fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()> {
        let data = self.object(bucket, object).ok_or_else(|| anyhow!("{bucket}/{object} not found"))?;
        tokio::fs::write(destination, data).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, object: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(&(bucket.to_string(), object.to_string()));
        Ok(())
    }
}
