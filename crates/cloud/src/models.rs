use std::time::Duration;

use gcb_ci_core::models::BuildStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default)]
    pub steps: Vec<BuildStep>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub create_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finish_time: Option<OffsetDateTime>,
    pub log_url: Option<String>,
    pub logs_bucket: Option<String>,
    #[serde(default)]
    pub results: BuildResults,
}

impl Build {
    /// Bucket and object name of the build's combined log.
    pub fn log_object(&self) -> Option<(String, String)> {
        let bucket = self.logs_bucket.as_deref()?;
        let bucket = bucket.strip_prefix("gs://").unwrap_or(bucket).trim_end_matches('/');
        if bucket.is_empty() || self.id.is_empty() {
            return None;
        }
        Some((bucket.to_string(), format!("log-{}.txt", self.id)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: BuildStatus,
    pub timing: Option<TimeSpan>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSpan {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
}

impl TimeSpan {
    pub fn duration(&self) -> Option<Duration> {
        let elapsed = self.end_time? - self.start_time?;
        elapsed.try_into().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildResults {
    #[serde(default)]
    pub images: Vec<BuiltImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuiltImage {
    pub name: String,
    pub digest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let build: Build = serde_json::from_str(
            r#"{
                "id": "b-1",
                "status": "WORKING",
                "createTime": "2024-03-01T12:00:00.123456Z",
                "logUrl": "https://console.cloud.google.com/b-1",
                "logsBucket": "gs://artifacts",
                "steps": [
                    {"name": "gcr.io/cloud-builders/docker", "status": "SUCCESS",
                     "timing": {"startTime": "2024-03-01T12:00:01Z", "endTime": "2024-03-01T12:00:31.5Z"}},
                    {"name": "ubuntu", "status": "QUEUED"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(build.status, BuildStatus::Working);
        assert!(build.start_time.is_none());
        assert_eq!(build.steps[0].timing.as_ref().unwrap().duration(), Some(Duration::from_millis(30500)));
        assert!(build.steps[1].timing.is_none());
        assert!(build.results.images.is_empty());
        assert_eq!(build.log_object(), Some(("artifacts".to_string(), "log-b-1.txt".to_string())));
    }
}
