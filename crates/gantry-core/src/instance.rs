//! Instance and execution record types.

use crate::context::InstanceContext;
use crate::ids::{InstanceId, RunId};
use crate::job::StepDefinition;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One concrete, isolated execution of the step list under one matrix
/// combination. Created at expansion time, discarded with the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: InstanceId,
    pub index: usize,
    pub axes: IndexMap<String, serde_json::Value>,
    pub display_name: String,
    pub status: InstanceStatus,
    pub steps: Vec<StepRecord>,
    /// Outputs published by steps via the output file: "step.key" -> value.
    pub outputs: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl JobInstance {
    pub fn new(
        index: usize,
        axes: IndexMap<String, serde_json::Value>,
        display_name: String,
        steps: &[StepDefinition],
    ) -> Self {
        Self {
            id: InstanceId::new(),
            index,
            axes,
            display_name,
            status: InstanceStatus::Pending,
            steps: steps.iter().map(StepRecord::pending).collect(),
            outputs: HashMap::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Matrix axis values rendered as strings for interpolation.
    pub fn axis_strings(&self) -> IndexMap<String, String> {
        self.axes
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()
    }

    /// Build the interpolation context for this instance.
    pub fn context(&self, run_id: RunId, variables: &HashMap<String, String>) -> InstanceContext {
        let mut ctx = InstanceContext::new();
        ctx.run_id = run_id.to_string();
        ctx.variables = variables.clone();
        ctx.matrix = self.axis_strings();
        ctx.outputs = self.outputs.clone();
        for record in &self.steps {
            ctx.statuses
                .insert(record.name.clone(), record.status.to_string());
        }
        ctx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }
}

/// Per-step execution record: status, exit code, captured output, timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub output: Vec<OutputLine>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StepRecord {
    pub fn pending(step: &StepDefinition) -> Self {
        Self {
            name: step.name.clone(),
            status: StepStatus::Pending,
            exit_code: None,
            output: Vec::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::Cancelled
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// A captured line of step output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_axis_strings_render_non_strings() {
        let mut axes = IndexMap::new();
        axes.insert("os".to_string(), serde_json::json!("macos"));
        axes.insert("version".to_string(), serde_json::json!(20));
        let instance = JobInstance::new(0, axes, "build".to_string(), &[]);

        let strings = instance.axis_strings();
        assert_eq!(strings.get("os").map(String::as_str), Some("macos"));
        assert_eq!(strings.get("version").map(String::as_str), Some("20"));
    }

    #[test]
    fn test_context_includes_step_statuses() {
        let mut axes = IndexMap::new();
        axes.insert("os".to_string(), serde_json::json!("linux"));
        let mut instance = JobInstance::new(0, axes, "build".to_string(), &[]);
        instance.steps.push(StepRecord {
            name: "compile".to_string(),
            status: StepStatus::Succeeded,
            exit_code: Some(0),
            output: Vec::new(),
            started_at: None,
            completed_at: None,
            duration_ms: Some(10),
        });

        let ctx = instance.context(RunId::new(), &HashMap::new());
        assert_eq!(
            ctx.statuses.get("compile").map(String::as_str),
            Some("succeeded")
        );
    }
}
