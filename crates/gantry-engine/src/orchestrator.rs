//! Run orchestration.
//!
//! Owns the run lifecycle: expands the matrix once, dispatches each
//! instance to the step executor with failure isolation, and invokes
//! the artifact collector for succeeded instances.

use crate::actions::{ActionRunner, ShellAction};
use crate::artifacts::{ArtifactCollector, StagedArtifact};
use crate::executor::{CancellationFlag, StepExecutor};
use crate::matrix::MatrixExpander;
use gantry_core::error::{Error, Result};
use gantry_core::ids::RunId;
use gantry_core::instance::{InstanceStatus, JobInstance, RunStatus, StepStatus};
use gantry_core::job::JobDefinition;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Expanding,
    Running,
    Collecting,
    Completed(RunStatus),
}

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workspace: PathBuf,
    /// Root of the artifact output area; each run stages under its own
    /// subdirectory.
    pub output_dir: PathBuf,
    /// Extra variables layered over the job's declared ones.
    pub variables: HashMap<String, String>,
    /// Overrides the job's `fail_fast` when set.
    pub fail_fast: Option<bool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output_dir: PathBuf::from("artifacts"),
            variables: HashMap::new(),
            fail_fast: None,
        }
    }
}

/// Final report for one instance: its execution record plus the result
/// of artifact collection.
#[derive(Debug, Serialize)]
pub struct InstanceReport {
    pub instance: JobInstance,
    pub artifacts: Vec<StagedArtifact>,
    pub collection_error: Option<String>,
}

/// Final report for the run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub job_name: String,
    pub status: RunStatus,
    pub instances: Vec<InstanceReport>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// The run orchestrator.
pub struct Orchestrator {
    runner: Arc<dyn ActionRunner>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellAction::new()))
    }

    pub fn with_runner(runner: Arc<dyn ActionRunner>) -> Self {
        Self { runner }
    }

    /// Execute a full run of the given job description.
    ///
    /// Configuration errors and statically-detectable artifact name
    /// collisions abort before any instance executes. Instance failures
    /// are isolated; the overall status is `Succeeded` only if every
    /// instance succeeded and every eligible artifact was collected.
    pub async fn execute(&self, definition: &JobDefinition, config: RunConfig) -> Result<RunReport> {
        let start = std::time::Instant::now();
        let run_id = RunId::new();
        let mut state = RunState::Pending;
        debug!(run_id = %run_id, state = ?state, "Run created");

        definition.validate()?;

        let mut variables = definition.variables.clone();
        variables.extend(config.variables.clone());

        state = RunState::Expanding;
        debug!(run_id = %run_id, state = ?state, "Run state change");
        let instances = MatrixExpander::new().expand(definition)?;
        ArtifactCollector::verify_unique_names(definition, &instances, run_id, &variables)?;
        info!(
            run_id = %run_id,
            job = %definition.name,
            instances = instances.len(),
            "Matrix expanded"
        );

        state = RunState::Running;
        debug!(run_id = %run_id, state = ?state, "Run state change");
        let fail_fast = config.fail_fast.unwrap_or(definition.fail_fast);
        let cancel = CancellationFlag::new();
        let max_parallel = definition
            .matrix
            .as_ref()
            .and_then(|m| m.max_parallel)
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or_else(|| instances.len().max(1));
        let permits = Arc::new(Semaphore::new(max_parallel));
        let executor = Arc::new(StepExecutor::new(self.runner.clone()));

        let mut join_set = JoinSet::new();
        for mut instance in instances {
            let permits = permits.clone();
            let cancel = cancel.clone();
            let executor = executor.clone();
            let definition = definition.clone();
            let workspace = config.workspace.clone();
            let variables = variables.clone();

            join_set.spawn(async move {
                let _permit = permits.acquire_owned().await;

                // A tripped flag before the first step means this
                // instance never started: cancel without executing.
                if cancel.is_tripped() {
                    instance.status = InstanceStatus::Cancelled;
                    for record in &mut instance.steps {
                        record.status = StepStatus::Cancelled;
                    }
                    return instance;
                }

                executor
                    .execute(&definition, &mut instance, run_id, &workspace, &variables, &cancel)
                    .await;

                if fail_fast && instance.status == InstanceStatus::Failed {
                    info!(
                        run_id = %run_id,
                        instance = %instance.display_name,
                        "Fail-fast: cancelling not-yet-started instances"
                    );
                    cancel.trip();
                }

                instance
            });
        }

        let mut completed = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(instance) => completed.push(instance),
                Err(e) => {
                    return Err(Error::Internal(format!("instance task failed: {}", e)));
                }
            }
        }
        completed.sort_by_key(|i| i.index);

        state = RunState::Collecting;
        debug!(run_id = %run_id, state = ?state, "Run state change");
        let collector = ArtifactCollector::new(&config.output_dir);
        let mut reports = Vec::new();
        let mut run_failed = false;

        for instance in completed {
            if instance.status != InstanceStatus::Succeeded {
                run_failed = true;
                reports.push(InstanceReport {
                    instance,
                    artifacts: Vec::new(),
                    collection_error: None,
                });
                continue;
            }

            match collector
                .collect(run_id, &instance, &definition.artifacts, &config.workspace, &variables)
                .await
            {
                Ok(artifacts) => reports.push(InstanceReport {
                    instance,
                    artifacts,
                    collection_error: None,
                }),
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        instance = %instance.display_name,
                        error = %e,
                        "Artifact collection failed"
                    );
                    run_failed = true;
                    reports.push(InstanceReport {
                        instance,
                        artifacts: Vec::new(),
                        collection_error: Some(e.to_string()),
                    });
                }
            }
        }

        let status = if run_failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        state = RunState::Completed(status);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(run_id = %run_id, state = ?state, duration_ms, "Run completed");

        Ok(RunReport {
            run_id,
            job_name: definition.name.clone(),
            status,
            instances: reports,
            duration_ms,
        })
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::job::JobDefinition;
    use std::path::Path;

    fn definition(yaml: &str) -> JobDefinition {
        JobDefinition::from_yaml(yaml).unwrap()
    }

    fn config(workspace: &Path, output: &Path) -> RunConfig {
        RunConfig {
            workspace: workspace.to_path_buf(),
            output_dir: output.to_path_buf(),
            variables: HashMap::new(),
            fail_fast: None,
        }
    }

    fn instance<'a>(report: &'a RunReport, mode: &str) -> &'a InstanceReport {
        report
            .instances
            .iter()
            .find(|r| r.instance.axes["mode"] == serde_json::json!(mode))
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_isolation_without_fail_fast() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
fail_fast: false
matrix:
  axes:
    mode: [fail, good]
steps:
  - name: produce
    run: "test \"${{ matrix.mode }}\" = good && echo out > result-${{ matrix.mode }}.txt"
artifacts:
  - name: result-${{ matrix.mode }}
    path: result-${{ matrix.mode }}.txt
"#,
        );

        let report = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            instance(&report, "fail").instance.status,
            InstanceStatus::Failed
        );
        assert_eq!(
            instance(&report, "good").instance.status,
            InstanceStatus::Succeeded
        );

        // The sibling's artifacts were still collected
        let good = instance(&report, "good");
        assert_eq!(good.artifacts.len(), 1);
        assert!(good.artifacts[0].path.exists());
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_not_yet_started_instances() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
fail_fast: true
matrix:
  axes:
    mode: [fail, second, third]
  max_parallel: 1
steps:
  - name: mark
    run: "touch ran-${{ matrix.mode }} && test \"${{ matrix.mode }}\" != fail"
"#,
        );

        let report = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            instance(&report, "fail").instance.status,
            InstanceStatus::Failed
        );
        for mode in ["second", "third"] {
            let cancelled = instance(&report, mode);
            assert_eq!(cancelled.instance.status, InstanceStatus::Cancelled);
            assert!(
                cancelled
                    .instance
                    .steps
                    .iter()
                    .all(|s| s.status == StepStatus::Cancelled)
            );
            // Never executed any step
            assert!(!workspace.path().join(format!("ran-{}", mode)).exists());
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_only_that_instance_collection() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
matrix:
  axes:
    mode: [good, bad]
steps:
  - name: produce
    run: "if [ \"${{ matrix.mode }}\" = good ]; then echo out > result-${{ matrix.mode }}.txt; fi"
artifacts:
  - name: result-${{ matrix.mode }}
    path: result-${{ matrix.mode }}.txt
"#,
        );

        let report = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);

        let good = instance(&report, "good");
        assert_eq!(good.instance.status, InstanceStatus::Succeeded);
        assert_eq!(good.artifacts.len(), 1);
        assert!(good.collection_error.is_none());

        let bad = instance(&report, "bad");
        assert_eq!(bad.instance.status, InstanceStatus::Succeeded);
        assert!(bad.artifacts.is_empty());
        assert!(
            bad.collection_error
                .as_deref()
                .is_some_and(|e| e.contains("missing"))
        );
    }

    #[tokio::test]
    async fn test_static_collision_aborts_before_any_execution() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
matrix:
  axes:
    mode: [a, b]
steps:
  - name: mark
    run: "touch ran-${{ matrix.mode }}"
artifacts:
  - name: installer
    path: ran-${{ matrix.mode }}
"#,
        );

        let err = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactNameCollision { .. }));

        // No instance executed, no store mutation from either
        assert!(!workspace.path().join("ran-a").exists());
        assert!(!workspace.path().join("ran-b").exists());
        assert!(std::fs::read_dir(output.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_configuration_error_is_fatal() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
matrix:
  axes:
    os: []
steps:
  - name: run
    run: make
"#,
        );

        let err = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_successful_run_reports_succeeded() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let def = definition(
            r#"
version: "1"
name: build
matrix:
  axes:
    mode: [one, two]
steps:
  - name: produce
    run: "echo ${{ matrix.mode }} > out-${{ matrix.mode }}.txt"
artifacts:
  - name: out-${{ matrix.mode }}
    path: out-${{ matrix.mode }}.txt
"#,
        );

        let report = Orchestrator::new()
            .execute(&def, config(workspace.path(), output.path()))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.instances.len(), 2);
        for r in &report.instances {
            assert_eq!(r.instance.status, InstanceStatus::Succeeded);
            assert_eq!(r.artifacts.len(), 1);
        }
    }
}
