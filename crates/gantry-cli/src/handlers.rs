//! Command handlers.

use console::style;
use gantry_core::instance::{InstanceStatus, StepStatus};
use gantry_core::job::JobDefinition;
use gantry_engine::{
    ArtifactCollector, MatrixExpander, Orchestrator, RunConfig, TriggerEvent, TriggerMatcher,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const STARTER: &str = r#"version: "1"
name: installer-build

on:
  - type: push
    branches: ["main"]

fail_fast: false

matrix:
  axes:
    os: [macos, windows]

steps:
  - name: checkout
    uses: checkout

  - name: install dependencies
    run: |
      echo "Installing dependencies..."
      # Add your install commands here

  - name: build installer
    run: |
      echo "Building for ${{ matrix.os }}..."
      # Add your build commands here

artifacts:
  - name: installer-${{ matrix.os }}
    path: dist/${{ matrix.os }}
"#;

/// Initialize a starter job description.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new("gantry.yaml");

    if path.exists() {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(());
    }

    std::fs::write(path, STARTER)?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(())
}

/// Validate a job description.
pub async fn validate(path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let (path, definition) = load(path)?;
    definition.validate()?;

    println!(
        "{} Job \"{}\" is valid ({})",
        style("✓").green(),
        definition.name,
        path.display()
    );
    println!("  Steps: {}", definition.steps.len());
    for step in &definition.steps {
        println!("    - {}", step.name);
    }
    if !definition.artifacts.is_empty() {
        println!("  Artifacts: {}", definition.artifacts.len());
    }

    Ok(())
}

/// Print the expanded matrix without running anything.
pub async fn expand(path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let (_, definition) = load(path)?;
    definition.validate()?;

    let instances = MatrixExpander::new().expand(&definition)?;
    ArtifactCollector::verify_unique_names(
        &definition,
        &instances,
        gantry_core::RunId::new(),
        &definition.variables,
    )?;

    println!(
        "{} {} instance(s):",
        style("▶").cyan(),
        style(instances.len()).bold()
    );
    for instance in &instances {
        println!("  [{}] {}", instance.index, instance.display_name);
    }

    Ok(())
}

/// Print the JSON Schema for job descriptions.
pub fn schema() -> Result<(), Box<dyn std::error::Error>> {
    let schema = schemars::schema_for!(JobDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Execute a run locally. Returns whether the run succeeded.
pub async fn run(
    path: Option<&str>,
    fail_fast: bool,
    output_dir: PathBuf,
    vars: Vec<String>,
    branch: Option<String>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let (path, definition) = load(path)?;
    definition.validate()?;

    if let Some(branch) = branch {
        let event = TriggerEvent::Push {
            branch: branch.clone(),
            paths_changed: Vec::new(),
        };
        if !TriggerMatcher::new().matches(&definition, &event) {
            println!(
                "{} Trigger policy does not match a push to '{}', nothing to do",
                style("⏭").dim(),
                branch
            );
            return Ok(true);
        }
    }

    let mut variables = HashMap::new();
    for var in &vars {
        let (key, value) = parse_var(var)?;
        variables.insert(key.to_string(), value.to_string());
    }

    println!(
        "\n{} Running job: {} ({})",
        style("▶").cyan().bold(),
        style(&definition.name).bold(),
        path.display()
    );

    let config = RunConfig {
        workspace: std::env::current_dir()?,
        output_dir,
        variables,
        fail_fast: fail_fast.then_some(true),
    };

    let report = Orchestrator::new().execute(&definition, config).await?;

    println!();
    for entry in &report.instances {
        let marker = match entry.instance.status {
            InstanceStatus::Succeeded => style("✓").green(),
            InstanceStatus::Cancelled => style("⏭").dim(),
            _ => style("✗").red(),
        };
        println!("{} {}", marker, style(&entry.instance.display_name).bold());

        for record in &entry.instance.steps {
            let status = match record.status {
                StepStatus::Succeeded => style("succeeded").green(),
                StepStatus::Failed => style("failed").red(),
                StepStatus::Skipped => style("skipped").dim(),
                StepStatus::Cancelled => style("cancelled").dim(),
                _ => style("pending").dim(),
            };
            println!("    {} {}", record.name, status);
        }

        for artifact in &entry.artifacts {
            println!(
                "    {} {} ({} bytes)",
                style("📦").cyan(),
                artifact.name,
                artifact.size_bytes
            );
        }
        if let Some(error) = &entry.collection_error {
            println!("    {} {}", style("✗").red(), error);
        }
    }

    println!();
    if report.succeeded() {
        println!(
            "{} Run {} succeeded in {:.2}s",
            style("✓").green().bold(),
            report.run_id,
            report.duration_ms as f64 / 1000.0
        );
    } else {
        println!(
            "{} Run {} failed after {:.2}s",
            style("✗").red().bold(),
            report.run_id,
            report.duration_ms as f64 / 1000.0
        );
    }

    Ok(report.succeeded())
}

fn parse_var(raw: &str) -> Result<(&str, &str), Box<dyn std::error::Error>> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| format!("invalid --var '{}', expected KEY=VALUE", raw).into())
}

fn load(path: Option<&str>) -> Result<(PathBuf, JobDefinition), Box<dyn std::error::Error>> {
    let path = find_job_file(path)
        .ok_or("no job description found (tried gantry.yaml, gantry.yml, .gantry/job.yaml)")?;
    let content = std::fs::read_to_string(&path)?;
    let definition = JobDefinition::from_yaml(&content)?;
    Ok((path, definition))
}

/// Find a job description in standard locations.
fn find_job_file(path: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = path {
        let path = PathBuf::from(p);
        return path.exists().then_some(path);
    }

    let candidates = ["gantry.yaml", "gantry.yml", ".gantry/job.yaml"];
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    None
}
