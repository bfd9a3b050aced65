//! Recording stand-in for the review platform.

use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::{
    RepoRef, ReviewPlatform,
    checks::{CheckRun, CheckRunRequest},
};

#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub check_run_id: u64,
    pub request: CheckRunRequest,
}

pub struct FakeGitHub {
    pub app_id: u64,
    pub next_id: AtomicU64,
    pub created: Mutex<Vec<(RepoRef, CheckRunRequest, u64)>>,
    pub updates: Mutex<Vec<RecordedUpdate>>,
    pub branches: Mutex<BTreeMap<String, Vec<String>>>,
    pub fail_auth: AtomicBool,
    pub forgotten: Mutex<Vec<u64>>,
}

impl Default for FakeGitHub {
    fn default() -> Self {
        Self {
            app_id: 1,
            next_id: AtomicU64::new(1000),
            created: Mutex::default(),
            updates: Mutex::default(),
            branches: Mutex::default(),
            fail_auth: AtomicBool::new(false),
            forgotten: Mutex::default(),
        }
    }
}

impl FakeGitHub {
    pub fn with_branches(self, full_name: &str, branches: &[&str]) -> Self {
        self.branches
            .lock()
            .unwrap()
            .insert(full_name.to_string(), branches.iter().map(|b| b.to_string()).collect());
        self
    }

    pub fn created_count(&self) -> usize { self.created.lock().unwrap().len() }

    pub fn updates(&self) -> Vec<RecordedUpdate> { self.updates.lock().unwrap().clone() }

    /// The update that completed a check run, if any.
    pub fn completion(&self, check_run_id: u64) -> Option<CheckRunRequest> {
        self.updates()
            .into_iter()
            .find(|u| u.check_run_id == check_run_id && u.request.conclusion.is_some())
            .map(|u| u.request)
    }
}

#[async_trait]
impl ReviewPlatform for FakeGitHub {
    fn app_id(&self) -> u64 { self.app_id }

    async fn installation_token(&self, _installation_id: u64) -> Result<String> {
        if self.fail_auth.load(Ordering::SeqCst) {
            bail!("bad credentials");
        }
        Ok("token".to_string())
    }

    async fn forget_installation(&self, installation_id: u64) {
        self.forgotten.lock().unwrap().push(installation_id);
    }

    async fn create_check_run(
        &self,
        _installation_id: u64,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<CheckRun> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push((repo.clone(), request.clone(), id));
        Ok(CheckRun { id, head_sha: request.head_sha.clone().unwrap_or_default() })
    }

    async fn update_check_run(
        &self,
        _installation_id: u64,
        _repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<()> {
        self.updates.lock().unwrap().push(RecordedUpdate { check_run_id, request: request.clone() });
        Ok(())
    }

    async fn list_branches(&self, _installation_id: u64, repo: &RepoRef) -> Result<Vec<String>> {
        Ok(self.branches.lock().unwrap().get(&repo.full_name()).cloned().unwrap_or_default())
    }
}
