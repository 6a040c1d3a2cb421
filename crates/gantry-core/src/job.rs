//! Job description types.
//!
//! These types represent the user-authored job YAML configuration.
//! Unknown fields are rejected at load time so that a malformed
//! description fails before any instance executes.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "on")]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u32,
}

fn default_timeout() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
    Manual,
}

/// Matrix of named axes whose Cartesian product defines the run's instances.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Axis name to discrete values, in declaration order.
    pub axes: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: IndexMap<String, serde_json::Value>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub condition: Option<ConditionExpression>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_step_timeout() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConditionExpression {
    #[serde(default, rename = "if")]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub unless: Option<String>,
}

/// A named output of a successful instance: a name template (may reference
/// matrix axis values and the run identifier) and a source path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    pub name: String,
    pub path: String,
}

/// A step's executable action, lowered from the raw `run`/`uses` fields.
///
/// Named actions carry typed parameters, validated when the job
/// description is loaded. Unknown action kinds and unknown `with` keys
/// are configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Run { command: String, shell: String },
    Checkout(CheckoutParams),
    SetupRuntime(SetupRuntimeParams),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutParams {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_depth() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupRuntimeParams {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl StepDefinition {
    /// Lower the raw action fields into a typed `StepAction`.
    pub fn action(&self) -> Result<StepAction> {
        match (&self.run, &self.uses) {
            (Some(_), Some(_)) => Err(Error::Configuration(format!(
                "step '{}' declares both 'run' and 'uses'",
                self.name
            ))),
            (None, None) => Err(Error::Configuration(format!(
                "step '{}' declares neither 'run' nor 'uses'",
                self.name
            ))),
            (Some(command), None) => {
                if !self.with.is_empty() {
                    return Err(Error::Configuration(format!(
                        "step '{}': 'with' parameters require a 'uses' action",
                        self.name
                    )));
                }
                Ok(StepAction::Run {
                    command: command.clone(),
                    shell: self.shell.clone(),
                })
            }
            (None, Some(uses)) => match uses.as_str() {
                "checkout" => Ok(StepAction::Checkout(self.typed_params(uses)?)),
                "setup-runtime" => Ok(StepAction::SetupRuntime(self.typed_params(uses)?)),
                other => Err(Error::Configuration(format!(
                    "step '{}' uses unknown action '{}'",
                    self.name, other
                ))),
            },
        }
    }

    fn typed_params<T: serde::de::DeserializeOwned>(&self, uses: &str) -> Result<T> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .with
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
            Error::Configuration(format!(
                "step '{}': invalid parameters for action '{}': {}",
                self.name, uses, e
            ))
        })
    }
}

impl JobDefinition {
    /// Parse a job description from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: JobDefinition = serde_yaml::from_str(content)?;
        Ok(definition)
    }

    /// Validate the loaded description.
    ///
    /// Every step must lower to a typed action and step names must be
    /// unique, so that `steps.<name>.*` lookups are unambiguous.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("job name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(Error::Configuration("job has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(Error::Configuration("step name is empty".to_string()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            step.action()?;
        }

        for artifact in &self.artifacts {
            if artifact.name.trim().is_empty() {
                return Err(Error::Configuration("artifact name is empty".to_string()));
            }
            if artifact.path.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "artifact '{}' has an empty path",
                    artifact.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
version: "1"
name: build
steps:
  - name: compile
    run: make
"#;

    #[test]
    fn test_parse_minimal() {
        let def = JobDefinition::from_yaml(MINIMAL).unwrap();
        assert_eq!(def.name, "build");
        assert!(!def.fail_fast);
        assert_eq!(def.steps.len(), 1);
        def.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: compile
    run: make
unexpected: true
"#;
        let err = JobDefinition::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_axes_preserve_declaration_order() {
        let yaml = r#"
version: "1"
name: build
matrix:
  axes:
    os: [macos, windows]
    arch: [x64, arm64]
steps:
  - name: compile
    run: make
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        let matrix = def.matrix.unwrap();
        let axes: Vec<&String> = matrix.axes.keys().collect();
        assert_eq!(axes, vec!["os", "arch"]);
    }

    #[test]
    fn test_step_with_both_run_and_uses() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: compile
    run: make
    uses: checkout
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: fetch
    uses: download-everything
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("unknown action"));
    }

    #[test]
    fn test_unknown_with_key_rejected() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: fetch
    uses: checkout
    with:
      ref: main
      submodule: recursive
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_checkout_params_lowered() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: fetch
    uses: checkout
    with:
      ref: release/1.0
      depth: 5
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        let action = def.steps[0].action().unwrap();
        match action {
            StepAction::Checkout(params) => {
                assert_eq!(params.git_ref.as_deref(), Some("release/1.0"));
                assert_eq!(params.depth, 5);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let yaml = r#"
version: "1"
name: build
steps:
  - name: compile
    run: make
  - name: compile
    run: make check
"#;
        let def = JobDefinition::from_yaml(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }
}
