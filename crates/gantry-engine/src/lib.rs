//! Gantry orchestration engine.
//!
//! Expands a job description's matrix into isolated instances, executes
//! each instance's steps through the action boundary, and stages
//! declared artifacts under deterministic names.

pub mod actions;
pub mod artifacts;
pub mod executor;
pub mod matrix;
pub mod orchestrator;
pub mod triggers;

pub use actions::{ActionContext, ActionOutcome, ActionRunner, ShellAction};
pub use artifacts::{ArtifactCollector, StagedArtifact};
pub use executor::{CancellationFlag, StepExecutor};
pub use matrix::MatrixExpander;
pub use orchestrator::{InstanceReport, Orchestrator, RunConfig, RunReport, RunState};
pub use triggers::{TriggerEvent, TriggerMatcher};
