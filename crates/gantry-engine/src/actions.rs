//! The step action boundary.
//!
//! The executor invokes an opaque action and observes only its exit
//! status and captured output. `ShellAction` is the default runner:
//! inline commands run through the step's shell, and the builtin named
//! actions are thin delegations to the corresponding tools.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::instance::{OutputLine, OutputStream};
use gantry_core::job::StepAction;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

/// Context for one action invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workspace: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// When set, exported to the action as `GANTRY_OUTPUT`; the action
    /// may write `key=value` lines there to publish step outputs.
    pub output_file: Option<PathBuf>,
}

/// Observed result of an action: exit status and captured output.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub exit_code: i32,
    pub output: Vec<OutputLine>,
    pub duration_ms: u64,
}

impl ActionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for action execution.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action: &StepAction, ctx: &ActionContext) -> Result<ActionOutcome>;
}

/// Shell runner for executing actions on the host.
pub struct ShellAction;

impl ShellAction {
    pub fn new() -> Self {
        Self
    }

    async fn execute_command(
        &self,
        shell: &str,
        command: &str,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome> {
        let start = std::time::Instant::now();
        let work_dir = ctx
            .working_directory
            .clone()
            .unwrap_or_else(|| ctx.workspace.clone());

        debug!(command = %command, workspace = %work_dir.display(), "Executing action");

        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&work_dir)
            .envs(&ctx.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(output_file) = &ctx.output_file {
            cmd.env("GANTRY_OUTPUT", output_file);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| gantry_core::Error::Internal(format!("Failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(capture_stream(stdout, OutputStream::Stdout));
        let stderr_handle = tokio::spawn(capture_stream(stderr, OutputStream::Stderr));

        let wait_result = match timeout(ctx.timeout, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = ctx.timeout.as_secs(), "Action timed out, killing process");
                let _ = child.kill().await;
                return Err(gantry_core::Error::Internal(format!(
                    "Action timed out after {}s",
                    ctx.timeout.as_secs()
                )));
            }
        };

        let mut output = stdout_handle.await.unwrap_or_default();
        output.extend(stderr_handle.await.unwrap_or_default());

        let status = wait_result.map_err(|e| {
            gantry_core::Error::Internal(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Action completed");

        Ok(ActionOutcome {
            exit_code,
            output,
            duration_ms,
        })
    }
}

async fn capture_stream<R: AsyncRead + Unpin>(
    stream: Option<R>,
    kind: OutputStream,
) -> Vec<OutputLine> {
    let mut lines_out = Vec::new();
    let Some(stream) = stream else {
        return lines_out;
    };

    let reader = BufReader::new(stream);
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        lines_out.push(OutputLine {
            stream: kind,
            content: line,
        });
    }
    lines_out
}

impl Default for ShellAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionRunner for ShellAction {
    async fn run(&self, action: &StepAction, ctx: &ActionContext) -> Result<ActionOutcome> {
        match action {
            StepAction::Run { command, shell } => self.execute_command(shell, command, ctx).await,
            StepAction::Checkout(params) => {
                let command = match (&params.repository, &params.git_ref) {
                    (Some(repository), _) => {
                        format!("git clone --depth {} {} .", params.depth, repository)
                    }
                    (None, Some(git_ref)) => format!("git checkout {}", git_ref),
                    (None, None) => "git rev-parse --is-inside-work-tree".to_string(),
                };
                self.execute_command("sh", &command, ctx).await
            }
            StepAction::SetupRuntime(params) => {
                let command = match &params.version {
                    Some(version) => format!("{} --version | grep -F '{}'", params.name, version),
                    None => format!("command -v {}", params.name),
                };
                self.execute_command("sh", &command, ctx).await
            }
        }
    }
}
