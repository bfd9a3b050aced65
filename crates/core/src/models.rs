use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// A build configuration as parsed from the repository, passed through to the build
/// service untouched apart from the fields the trigger fills in.
pub type BuildDefinition = serde_json::Map<String, serde_json::Value>;

/// Status of a remote build, as reported by the build service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    #[default]
    #[serde(other)]
    StatusUnknown,
}

impl BuildStatus {
    pub const TERMINAL: [Self; 6] = [
        Self::Success,
        Self::Failure,
        Self::InternalError,
        Self::Timeout,
        Self::Cancelled,
        Self::Expired,
    ];

    pub fn is_terminal(self) -> bool { self.conclusion().is_some() }

    /// Review conclusion for a terminal status; `None` while the build is still running.
    pub fn conclusion(self) -> Option<Conclusion> {
        match self {
            Self::Success => Some(Conclusion::Success),
            Self::Failure | Self::InternalError | Self::Expired => Some(Conclusion::Failure),
            Self::Cancelled => Some(Conclusion::Cancelled),
            Self::Timeout => Some(Conclusion::TimedOut),
            Self::StatusUnknown | Self::Pending | Self::Queued | Self::Working => None,
        }
    }

    /// Steps in these states never ran.
    pub fn is_unexecuted(self) -> bool { matches!(self, Self::Queued | Self::Pending) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusUnknown => "STATUS_UNKNOWN",
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Working => "WORKING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Neutral,
}

impl Conclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::ActionRequired => "action_required",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

impl AnnotationLevel {
    pub fn for_step(status: BuildStatus) -> Self {
        if status.is_unexecuted() {
            Self::Warning
        } else if status == BuildStatus::Success {
            Self::Notice
        } else {
            Self::Failure
        }
    }
}

/// Named build parameters derived from a pull request.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Substitutions {
    #[serde(rename = "COMMIT_SHA")]
    pub commit_sha: String,
    #[serde(rename = "SHORT_SHA")]
    pub short_sha: String,
    #[serde(rename = "REPO_NAME")]
    pub repo_name: String,
    #[serde(rename = "BRANCH_NAME")]
    pub branch_name: String,
    #[serde(rename = "REVISION_ID")]
    pub revision_id: String,
    #[serde(rename = "_HEAD_BRANCH")]
    pub head_branch: String,
    #[serde(rename = "_BASE_BRANCH")]
    pub base_branch: String,
    #[serde(rename = "_PR_NUMBER")]
    pub pr_number: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new(
        head_sha: &str,
        repo_name: &str,
        head_branch: &str,
        base_branch: &str,
        pr_number: u64,
    ) -> Self {
        Self {
            commit_sha: head_sha.to_string(),
            short_sha: head_sha.chars().take(7).collect(),
            repo_name: repo_name.to_string(),
            branch_name: base_branch.to_string(),
            revision_id: head_sha.to_string(),
            head_branch: head_branch.to_string(),
            base_branch: base_branch.to_string(),
            pr_number: pr_number.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether this set was derived from the pull request with the given coordinates.
    pub fn matches(&self, repo_name: &str, head_branch: &str, base_branch: &str, number: u64) -> bool {
        self.repo_name == repo_name
            && self.head_branch == head_branch
            && self.base_branch == base_branch
            && self.pr_number == number.to_string()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut out = self.extra.clone();
        for (key, value) in [
            ("COMMIT_SHA", &self.commit_sha),
            ("SHORT_SHA", &self.short_sha),
            ("REPO_NAME", &self.repo_name),
            ("BRANCH_NAME", &self.branch_name),
            ("REVISION_ID", &self.revision_id),
            ("_HEAD_BRANCH", &self.head_branch),
            ("_BASE_BRANCH", &self.base_branch),
            ("_PR_NUMBER", &self.pr_number),
        ] {
            out.insert(key.to_string(), value.clone());
        }
        out
    }
}

/// Repositories tracked for one installation: full name → integration branch.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedRepos(pub BTreeMap<String, Option<String>>);

impl TrackedRepos {
    pub fn target_branch(&self, full_name: &str) -> Option<&str> {
        self.0.get(full_name).and_then(|b| b.as_deref())
    }

    pub fn contains(&self, full_name: &str) -> bool { self.0.contains_key(full_name) }

    /// Whether a pull request from `full_name` into `base_ref` should be built.
    pub fn is_target(&self, full_name: &str, base_ref: &str) -> bool {
        self.target_branch(full_name) == Some(base_ref)
    }

    pub fn insert(&mut self, full_name: impl Into<String>, branch: Option<String>) {
        self.0.insert(full_name.into(), branch);
    }

    pub fn remove(&mut self, full_name: &str) -> bool { self.0.remove(full_name).is_some() }

    /// Clear the target branch of `full_name` if it is `branch`. Returns whether anything changed.
    pub fn clear_branch(&mut self, full_name: &str, branch: &str) -> bool {
        match self.0.get_mut(full_name) {
            Some(target) if target.as_deref() == Some(branch) => {
                *target = None;
                true
            }
            _ => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Outcome of each source preparation stage, accumulated over one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoStatus {
    pub completed: bool,
    pub fetched: bool,
    pub merged: bool,
    pub yaml_found: bool,
    pub yaml_file: Option<String>,
    pub config: Option<BuildDefinition>,
    /// 1-based line of every step declaration in `yaml_file`.
    pub step_lines: Vec<u32>,
    pub tar_created: bool,
    pub archive_name: Option<String>,
    pub uploaded: bool,
    pub bucket: Option<String>,
    pub object: Option<String>,
    pub object_uri: Option<String>,
    pub triggered: bool,
}
