//! Minimal `uses:` extraction from workflow and composite action files

use async_trait::async_trait;
use serde_yaml::Value;
use std::path::Path;
use wfref_cache::ReferenceExtractor;
use wfref_foundation::{CoreError, CoreResult};

/// Reads a document from disk and collects every `uses:` value it declares.
///
/// Workflows contribute `jobs.<id>.uses` and `jobs.<id>.steps[*].uses`;
/// composite actions contribute `runs.steps[*].uses`. References come back in
/// document order, duplicates included.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlReferenceExtractor;

impl YamlReferenceExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReferenceExtractor for YamlReferenceExtractor {
    async fn extract(&self, document: &Path) -> CoreResult<Vec<String>> {
        let content = tokio::fs::read_to_string(document).await?;
        references(&content).map_err(|e| {
            CoreError::invalid_data(format!("{}: {}", document.display(), e))
        })
    }
}

/// Collect the `uses:` values of a YAML document
pub fn references(content: &str) -> Result<Vec<String>, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let root: Value = serde_yaml::from_str(content)?;
    let mut found = Vec::new();

    if let Some(jobs) = root.get("jobs").and_then(Value::as_mapping) {
        for job in jobs.values() {
            push_uses(job, &mut found);
            push_step_uses(job, &mut found);
        }
    }

    if let Some(runs) = root.get("runs") {
        push_step_uses(runs, &mut found);
    }

    Ok(found)
}

fn push_step_uses(parent: &Value, found: &mut Vec<String>) {
    if let Some(steps) = parent.get("steps").and_then(Value::as_sequence) {
        for step in steps {
            push_uses(step, found);
        }
    }
}

fn push_uses(node: &Value, found: &mut Vec<String>) {
    if let Some(uses) = node.get("uses").and_then(Value::as_str) {
        found.push(uses.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_job_and_step_references() {
        let content = r#"
name: CI
on: [push]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: make
      - name: Setup
        uses: "actions/setup-java@v4"
        with:
          distribution: temurin
  call:
    uses: octo/shared/.github/workflows/release.yml@main
  local:
    runs-on: ubuntu-latest
    steps:
      - uses: ./.github/actions/build
      - uses: actions/checkout@v4
"#;

        assert_eq!(
            references(content).unwrap(),
            vec![
                "actions/checkout@v4",
                "actions/setup-java@v4",
                "octo/shared/.github/workflows/release.yml@main",
                "./.github/actions/build",
                "actions/checkout@v4",
            ]
        );
    }

    #[test]
    fn test_collects_composite_action_steps() {
        let content = r#"
name: Build
runs:
  using: composite
  steps:
    - uses: actions/cache@v4
    - run: echo done
      shell: bash
"#;
        assert_eq!(references(content).unwrap(), vec!["actions/cache@v4"]);
    }

    #[test]
    fn test_ignores_non_string_and_misplaced_values() {
        let content = r#"
uses: top/level@v1
jobs:
  weird:
    steps:
      - uses: 42
      - uses: [a, b]
      - not-a-step
"#;
        assert!(references(content).unwrap().is_empty());
    }

    #[test]
    fn test_empty_document_has_no_references() {
        assert!(references("").unwrap().is_empty());
        assert!(references("   \n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(references("jobs: [unclosed").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let extractor = YamlReferenceExtractor::new();
        let result = extractor.extract(Path::new("/nonexistent/wfref/ci.yml")).await;
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}
