//! Declared inputs and outputs of an action or reusable workflow
//!
//! Only the parameter mappings are consumed from a descriptor document:
//! top-level `inputs` / `outputs` for actions, `on.workflow_call.inputs` /
//! `on.workflow_call.outputs` for reusable workflows. Each entry's
//! `description` (when present) becomes the cached description text.

use crate::error::ResolutionError;
use crate::identity::ReferenceKind;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Parameter name -> description
pub type ParameterMap = BTreeMap<String, String>;

const FIELD_INPUTS: &str = "inputs";
const FIELD_OUTPUTS: &str = "outputs";
const FIELD_ON: &str = "on";
const FIELD_WORKFLOW_CALL: &str = "workflow_call";
const FIELD_DESCRIPTION: &str = "description";

/// Parsed parameters of one descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(default)]
    pub inputs: ParameterMap,
    #[serde(default)]
    pub outputs: ParameterMap,
}

impl ActionDescriptor {
    pub fn new(inputs: ParameterMap, outputs: ParameterMap) -> Self {
        Self { inputs, outputs }
    }

    /// Parse descriptor YAML for the given reference kind.
    ///
    /// A missing `inputs`/`outputs` key yields an empty map; an empty or
    /// non-mapping document is a [`ResolutionError::Parse`].
    pub fn parse(kind: ReferenceKind, content: &str) -> Result<Self, ResolutionError> {
        if content.trim().is_empty() {
            return Err(ResolutionError::parse("descriptor is empty"));
        }

        let document: Value =
            serde_yaml::from_str(content).map_err(|e| ResolutionError::parse(e.to_string()))?;
        let root = document
            .as_mapping()
            .ok_or_else(|| ResolutionError::parse("descriptor root is not a mapping"))?;

        let scope = match kind {
            ReferenceKind::Action => Some(root),
            ReferenceKind::Workflow => root
                .get(FIELD_ON)
                .and_then(Value::as_mapping)
                .and_then(|on| on.get(FIELD_WORKFLOW_CALL))
                .and_then(Value::as_mapping),
        };

        let Some(scope) = scope else {
            return Ok(Self::default());
        };

        Ok(Self {
            inputs: parameters(scope, FIELD_INPUTS)?,
            outputs: parameters(scope, FIELD_OUTPUTS)?,
        })
    }
}

fn parameters(scope: &Mapping, field: &str) -> Result<ParameterMap, ResolutionError> {
    let entries = match scope.get(field) {
        None | Some(Value::Null) => return Ok(ParameterMap::new()),
        Some(Value::Mapping(entries)) => entries,
        Some(_) => {
            return Err(ResolutionError::parse(format!(
                "'{}' is not a mapping",
                field
            )))
        }
    };

    Ok(entries
        .iter()
        .filter_map(|(name, definition)| {
            let name = scalar_to_string(name)?;
            let description = definition
                .as_mapping()
                .and_then(|m| m.get(FIELD_DESCRIPTION))
                .and_then(scalar_to_string)
                .map(|d| d.trim().to_string())
                .unwrap_or_default();
            Some((name, description))
        })
        .collect())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP_JAVA: &str = r#"
name: 'Setup Java JDK'
description: 'Set up a specific version of the Java JDK'
inputs:
  java-version:
    description: 'The Java version to set up.'
    required: false
  distribution:
    description: 'Java distribution.'
    required: true
  cache:
    required: false
outputs:
  distribution:
    description: 'Distribution of Java that has been installed'
  version:
    description: 'Actual version of the java environment that has been installed'
runs:
  using: 'node20'
  main: 'dist/setup/index.js'
"#;

    #[test]
    fn test_parse_action_descriptor() {
        let descriptor = ActionDescriptor::parse(ReferenceKind::Action, SETUP_JAVA).unwrap();
        assert_eq!(descriptor.inputs.len(), 3);
        assert_eq!(
            descriptor.inputs.get("java-version").map(String::as_str),
            Some("The Java version to set up.")
        );
        assert_eq!(descriptor.inputs.get("cache").map(String::as_str), Some(""));
        assert_eq!(descriptor.outputs.len(), 2);
    }

    #[test]
    fn test_missing_sections_are_empty() {
        let descriptor =
            ActionDescriptor::parse(ReferenceKind::Action, "name: x\nruns:\n  using: node20\n")
                .unwrap();
        assert!(descriptor.inputs.is_empty());
        assert!(descriptor.outputs.is_empty());

        let descriptor = ActionDescriptor::parse(ReferenceKind::Action, "inputs:\n").unwrap();
        assert!(descriptor.inputs.is_empty());
    }

    #[test]
    fn test_parse_reusable_workflow() {
        let content = r#"
on:
  workflow_call:
    inputs:
      environment:
        type: string
        description: Target environment
    outputs:
      url:
        description: Deployed URL
        value: ${{ jobs.deploy.outputs.url }}
  push:
    branches: [main]
jobs: {}
"#;
        let descriptor = ActionDescriptor::parse(ReferenceKind::Workflow, content).unwrap();
        assert_eq!(
            descriptor.inputs.get("environment").map(String::as_str),
            Some("Target environment")
        );
        assert_eq!(
            descriptor.outputs.get("url").map(String::as_str),
            Some("Deployed URL")
        );

        let not_callable = ActionDescriptor::parse(ReferenceKind::Workflow, "on: push\n").unwrap();
        assert_eq!(not_callable, ActionDescriptor::default());
    }

    #[test]
    fn test_malformed_descriptors() {
        assert!(matches!(
            ActionDescriptor::parse(ReferenceKind::Action, ""),
            Err(ResolutionError::Parse(_))
        ));
        assert!(matches!(
            ActionDescriptor::parse(ReferenceKind::Action, "- just\n- a list\n"),
            Err(ResolutionError::Parse(_))
        ));
        assert!(matches!(
            ActionDescriptor::parse(ReferenceKind::Action, "inputs: [a, b]\n"),
            Err(ResolutionError::Parse(_))
        ));
        assert!(matches!(
            ActionDescriptor::parse(ReferenceKind::Action, "inputs: {unclosed\n"),
            Err(ResolutionError::Parse(_))
        ));
    }
}
