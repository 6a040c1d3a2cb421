//! Per-instance step execution.
//!
//! Steps run strictly in declaration order. A false condition marks the
//! step skipped; a non-zero exit fails the instance and stops further
//! steps. Cancellation is observed between steps only, so a running
//! step always completes and its log stays intact.

use crate::actions::{ActionContext, ActionRunner};
use chrono::Utc;
use gantry_core::context::InstanceContext;
use gantry_core::ids::RunId;
use gantry_core::instance::{InstanceStatus, JobInstance, OutputLine, OutputStream, StepStatus};
use gantry_core::job::{JobDefinition, StepAction, StepDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Run-wide cancellation signal, observed between steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes the step list of one instance.
pub struct StepExecutor {
    runner: Arc<dyn ActionRunner>,
}

impl StepExecutor {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self { runner }
    }

    /// Execute all steps of `instance`, recording statuses, exit codes,
    /// and captured output on its step records.
    pub async fn execute(
        &self,
        definition: &JobDefinition,
        instance: &mut JobInstance,
        run_id: RunId,
        workspace: &Path,
        variables: &HashMap<String, String>,
        cancel: &CancellationFlag,
    ) {
        let start = std::time::Instant::now();
        instance.status = InstanceStatus::Running;
        instance.started_at = Some(Utc::now());

        info!(
            run_id = %run_id,
            instance = %instance.display_name,
            "Starting instance"
        );

        let mut failed = false;
        let mut cancelled = false;

        for idx in 0..definition.steps.len() {
            let step = &definition.steps[idx];

            if failed || cancelled {
                instance.steps[idx].status = StepStatus::Cancelled;
                continue;
            }

            if cancel.is_tripped() {
                info!(
                    instance = %instance.display_name,
                    step = %step.name,
                    "Cancellation observed, stopping instance"
                );
                cancelled = true;
                instance.steps[idx].status = StepStatus::Cancelled;
                continue;
            }

            // Rebuilt per step so conditions see prior statuses and outputs
            let ctx = instance.context(run_id, variables);

            if let Some(condition) = &step.condition
                && !ctx.evaluate_condition(condition)
            {
                debug!(step = %step.name, "Step skipped (condition unmet)");
                instance.steps[idx].status = StepStatus::Skipped;
                continue;
            }

            instance.steps[idx].status = StepStatus::Running;
            instance.steps[idx].started_at = Some(Utc::now());

            let output_file =
                workspace.join(format!(".gantry_output_{}", step.name.replace(' ', "_")));
            let action_ctx = self.action_context(step, &ctx, workspace, &output_file, variables);

            let action = match step.action() {
                Ok(action) => interpolate_action(action, &ctx),
                Err(e) => {
                    // Validation happens at load time; reaching this is a defect
                    error!(step = %step.name, error = %e, "Step action failed to lower");
                    fail_step(&mut instance.steps[idx], -1, e.to_string());
                    failed = true;
                    continue;
                }
            };

            let result = self.runner.run(&action, &action_ctx).await;
            let record = &mut instance.steps[idx];

            match result {
                Ok(outcome) => {
                    record.exit_code = Some(outcome.exit_code);
                    record.output = outcome.output;
                    record.duration_ms = Some(outcome.duration_ms);
                    record.completed_at = Some(Utc::now());

                    if outcome.exit_code == 0 {
                        record.status = StepStatus::Succeeded;
                        debug!(step = %step.name, "Step succeeded");
                    } else {
                        record.status = StepStatus::Failed;
                        error!(
                            step = %step.name,
                            exit_code = outcome.exit_code,
                            "Step failed"
                        );
                        if !step.continue_on_error {
                            failed = true;
                        }
                    }
                }
                Err(e) => {
                    error!(step = %step.name, error = %e, "Step errored");
                    fail_step(record, -1, e.to_string());
                    if !step.continue_on_error {
                        failed = true;
                    }
                }
            }

            self.ingest_outputs(instance, &step.name, &output_file).await;
        }

        instance.completed_at = Some(Utc::now());
        instance.duration_ms = Some(start.elapsed().as_millis() as u64);
        instance.status = if cancelled {
            InstanceStatus::Cancelled
        } else if failed {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Succeeded
        };

        info!(
            run_id = %run_id,
            instance = %instance.display_name,
            status = ?instance.status,
            "Instance finished"
        );
    }

    fn action_context(
        &self,
        step: &StepDefinition,
        ctx: &InstanceContext,
        workspace: &Path,
        output_file: &Path,
        variables: &HashMap<String, String>,
    ) -> ActionContext {
        let mut env = variables.clone();
        for (k, v) in &step.variables {
            env.insert(k.clone(), ctx.interpolate(v));
        }

        ActionContext {
            workspace: workspace.to_path_buf(),
            working_directory: step
                .working_directory
                .as_ref()
                .map(|d| PathBuf::from(ctx.interpolate(d))),
            env,
            timeout: Duration::from_secs(u64::from(step.timeout_minutes) * 60),
            output_file: Some(output_file.to_path_buf()),
        }
    }

    /// Parse `key=value` lines published by the step and remove the file.
    async fn ingest_outputs(&self, instance: &mut JobInstance, step_name: &str, path: &Path) {
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            return;
        };
        let _ = tokio::fs::remove_file(path).await;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    instance
                        .outputs
                        .insert(format!("{}.{}", step_name, key), value.trim().to_string());
                }
            }
        }
    }
}

fn fail_step(record: &mut gantry_core::instance::StepRecord, exit_code: i32, message: String) {
    record.status = StepStatus::Failed;
    record.exit_code = Some(exit_code);
    record.output.push(OutputLine {
        stream: OutputStream::Stderr,
        content: message,
    });
    record.completed_at = Some(Utc::now());
}

/// Interpolate instance context into the parts of an action that accept
/// templates.
fn interpolate_action(action: StepAction, ctx: &InstanceContext) -> StepAction {
    match action {
        StepAction::Run { command, shell } => StepAction::Run {
            command: ctx.interpolate(&command),
            shell,
        },
        StepAction::Checkout(mut params) => {
            params.repository = params.repository.map(|r| ctx.interpolate(&r));
            params.git_ref = params.git_ref.map(|r| ctx.interpolate(&r));
            StepAction::Checkout(params)
        }
        StepAction::SetupRuntime(mut params) => {
            params.name = ctx.interpolate(&params.name);
            params.version = params.version.map(|v| ctx.interpolate(&v));
            StepAction::SetupRuntime(params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionOutcome, ShellAction};
    use crate::matrix::MatrixExpander;
    use async_trait::async_trait;
    use gantry_core::Result;
    use gantry_core::job::JobDefinition;
    use std::sync::Mutex;

    /// Records every action it is asked to run; succeeds always.
    #[derive(Default)]
    struct ProbeRunner {
        invoked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionRunner for ProbeRunner {
        async fn run(&self, action: &StepAction, _ctx: &ActionContext) -> Result<ActionOutcome> {
            let label = match action {
                StepAction::Run { command, .. } => command.clone(),
                StepAction::Checkout(_) => "checkout".to_string(),
                StepAction::SetupRuntime(_) => "setup-runtime".to_string(),
            };
            self.invoked.lock().unwrap().push(label);
            Ok(ActionOutcome {
                exit_code: 0,
                output: Vec::new(),
                duration_ms: 1,
            })
        }
    }

    fn definition(yaml: &str) -> JobDefinition {
        let def = JobDefinition::from_yaml(yaml).unwrap();
        def.validate().unwrap();
        def
    }

    async fn run_single(
        def: &JobDefinition,
        runner: Arc<dyn ActionRunner>,
        workspace: &Path,
    ) -> JobInstance {
        let mut instances = MatrixExpander::new().expand(def).unwrap();
        let mut instance = instances.remove(0);
        let executor = StepExecutor::new(runner);
        executor
            .execute(
                def,
                &mut instance,
                RunId::new(),
                workspace,
                &def.variables,
                &CancellationFlag::new(),
            )
            .await;
        instance
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: one
    run: "true"
  - name: two
    run: "true"
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert!(
            instance
                .steps
                .iter()
                .all(|s| s.status == StepStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_fail_stop_within_instance() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: boom
    run: "exit 1"
  - name: after
    run: "true"
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.status, InstanceStatus::Failed);
        assert_eq!(instance.steps[0].status, StepStatus::Failed);
        assert_eq!(instance.steps[0].exit_code, Some(1));
        assert_eq!(instance.steps[1].status, StepStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_skipped_step_never_invokes_action() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
matrix:
  axes:
    os: [linux]
steps:
  - name: always
    run: "echo always"
  - name: mac-only
    run: "echo mac"
    condition:
      if: matrix.os == 'macos'
"#,
        );

        let probe = Arc::new(ProbeRunner::default());
        let instance = run_single(&def, probe.clone(), dir.path()).await;

        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.steps[1].status, StepStatus::Skipped);
        let invoked = probe.invoked.lock().unwrap();
        assert_eq!(invoked.as_slice(), ["echo always"]);
    }

    #[tokio::test]
    async fn test_skipped_step_does_not_fail_instance() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: skipped
    run: "exit 1"
    condition:
      if: "false"
  - name: after
    run: "true"
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.steps[0].status, StepStatus::Skipped);
        assert_eq!(instance.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_instance_alive() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: flaky
    run: "exit 1"
    continue_on_error: true
  - name: after
    run: "true"
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.steps[0].status, StepStatus::Failed);
        assert_eq!(instance.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_step_outputs_feed_later_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: detect
    run: "echo flavor=nightly >> \"$GANTRY_OUTPUT\""
  - name: nightly-only
    run: "true"
    condition:
      if: steps.detect.outputs.flavor == 'nightly'
  - name: stable-only
    run: "true"
    condition:
      if: steps.detect.outputs.flavor == 'stable'
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.steps[1].status, StepStatus::Succeeded);
        assert_eq!(instance.steps[2].status, StepStatus::Skipped);
        assert_eq!(
            instance.outputs.get("detect.flavor").map(String::as_str),
            Some("nightly")
        );
    }

    #[tokio::test]
    async fn test_prior_step_status_visible_to_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: flaky
    run: "exit 1"
    continue_on_error: true
  - name: on-failure
    run: "true"
    condition:
      if: steps.flaky.status == 'failed'
"#,
        );

        let instance = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        assert_eq!(instance.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_rerun_of_pure_steps_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: one
    run: "true"
  - name: boom
    run: "exit 2"
  - name: never
    run: "true"
"#,
        );

        let first = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;
        let second = run_single(&def, Arc::new(ShellAction::new()), dir.path()).await;

        let statuses = |i: &JobInstance| i.steps.iter().map(|s| s.status).collect::<Vec<_>>();
        assert_eq!(statuses(&first), statuses(&second));
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(
            r#"
version: "1"
name: build
steps:
  - name: one
    run: "true"
  - name: two
    run: "true"
"#,
        );

        let cancel = CancellationFlag::new();
        cancel.trip();

        let mut instances = MatrixExpander::new().expand(&def).unwrap();
        let mut instance = instances.remove(0);
        let executor = StepExecutor::new(Arc::new(ShellAction::new()));
        executor
            .execute(
                &def,
                &mut instance,
                RunId::new(),
                dir.path(),
                &def.variables,
                &cancel,
            )
            .await;

        assert_eq!(instance.status, InstanceStatus::Cancelled);
        assert!(
            instance
                .steps
                .iter()
                .all(|s| s.status == StepStatus::Cancelled)
        );
    }
}
