use gcb_ci_core::models::{AnnotationLevel, CheckStatus, Conclusion};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum annotations accepted by one check-run update.
pub const MAX_ANNOTATIONS: usize = 50;

/// Body of a check-run create or update request. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,
}

impl CheckRunRequest {
    pub fn create(name: impl Into<String>, head_sha: impl Into<String>) -> Self {
        Self { name: Some(name.into()), head_sha: Some(head_sha.into()), ..Default::default() }
    }

    pub fn in_progress(output: CheckRunOutput) -> Self {
        Self {
            status: Some(CheckStatus::InProgress),
            started_at: Some(OffsetDateTime::now_utc()),
            output: Some(output),
            ..Default::default()
        }
    }

    pub fn progress(output: CheckRunOutput) -> Self {
        Self { output: Some(output), ..Default::default() }
    }

    pub fn with_details_url(mut self, url: Option<String>) -> Self {
        self.details_url = url;
        self
    }

    pub fn completed(conclusion: Conclusion, output: CheckRunOutput) -> Self {
        Self {
            status: Some(CheckStatus::Completed),
            conclusion: Some(conclusion),
            completed_at: Some(OffsetDateTime::now_utc()),
            output: Some(output),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub annotation_level: AnnotationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_details: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    #[serde(default)]
    pub head_sha: String,
}
