use std::path::Path;

use anyhow::{Context, Result, bail};
use gcb_ci_core::models::BuildDefinition;

/// Accepted build configuration names, in order of preference.
pub const CONFIG_FILES: [&str; 2] = ["cloudbuild-pr.yaml", "cloudbuild-pr.yml"];

const STEP_PREFIX: &str = "- name:";

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredConfig {
    pub file: String,
    pub contents: String,
}

impl DiscoveredConfig {
    pub fn parse(&self) -> Result<BuildDefinition> {
        let value: serde_json::Value = serde_yaml::from_str(&self.contents)
            .with_context(|| format!("Failed to parse {}", self.file))?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => bail!("{} is not a mapping", self.file),
        }
    }

    /// 1-based line numbers of step declarations.
    pub fn step_lines(&self) -> Vec<u32> {
        self.contents
            .lines()
            .zip(1..)
            .filter(|(line, _)| line.starts_with(STEP_PREFIX))
            .map(|(_, n)| n)
            .collect()
    }
}

/// Look for a build configuration among the top-level files of `dir`.
pub async fn find_config(dir: &Path) -> Result<Option<DiscoveredConfig>> {
    for name in CONFIG_FILES {
        let path = dir.join(name);
        if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            continue;
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Some(DiscoveredConfig { file: name.to_string(), contents }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
steps:
- name: gcr.io/cloud-builders/docker
  args: ['build', '.']
  # - name: commented
- name: ubuntu
  entrypoint: bash
timeout: 20m
";

    #[tokio::test]
    async fn test_find_config_prefers_yaml() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_config(dir.path()).await.unwrap(), None);
        std::fs::write(dir.path().join("cloudbuild-pr.yml"), "steps: []\n").unwrap();
        assert_eq!(find_config(dir.path()).await.unwrap().unwrap().file, "cloudbuild-pr.yml");
        std::fs::write(dir.path().join("cloudbuild-pr.yaml"), CONFIG).unwrap();
        assert_eq!(find_config(dir.path()).await.unwrap().unwrap().file, "cloudbuild-pr.yaml");
    }

    #[test]
    fn test_step_lines_and_parse() {
        let config = DiscoveredConfig { file: "cloudbuild-pr.yaml".into(), contents: CONFIG.into() };
        assert_eq!(config.step_lines(), vec![2, 5]);
        let definition = config.parse().unwrap();
        assert_eq!(definition["timeout"], "20m");
        assert_eq!(definition["steps"].as_array().unwrap().len(), 2);

        let config = DiscoveredConfig { file: "cloudbuild-pr.yml".into(), contents: "- a\n- b\n".into() };
        assert!(config.parse().is_err());
    }
}
