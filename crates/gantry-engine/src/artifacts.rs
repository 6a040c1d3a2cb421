//! Artifact staging for succeeded instances.
//!
//! Artifacts are staged into a per-run output area under their expanded
//! names. The staged namespace is append-only; name reservation is
//! serialized so concurrently-collecting instances cannot race the
//! collision check.

use gantry_core::error::{Error, Result};
use gantry_core::ids::{ArtifactId, InstanceId, RunId};
use gantry_core::instance::JobInstance;
use gantry_core::job::{ArtifactSpec, JobDefinition};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A staged artifact record.
#[derive(Debug, Clone, Serialize)]
pub struct StagedArtifact {
    pub id: ArtifactId,
    pub name: String,
    pub instance_id: InstanceId,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Stages declared artifacts into the per-run output area.
pub struct ArtifactCollector {
    root: PathBuf,
    staged_names: Mutex<HashSet<String>>,
}

impl ArtifactCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staged_names: Mutex::new(HashSet::new()),
        }
    }

    /// The output area for one run.
    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    /// Collect the declared artifacts of a succeeded instance.
    ///
    /// A missing source path is reported, not retried: it reflects a
    /// build-step defect, not a transient condition.
    pub async fn collect(
        &self,
        run_id: RunId,
        instance: &JobInstance,
        specs: &[ArtifactSpec],
        workspace: &Path,
        variables: &HashMap<String, String>,
    ) -> Result<Vec<StagedArtifact>> {
        let ctx = instance.context(run_id, variables);
        let mut staged = Vec::new();

        for spec in specs {
            let name = ctx.interpolate(&spec.name);
            if name.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "artifact name template '{}' expanded to an empty name",
                    spec.name
                )));
            }

            let source = workspace.join(ctx.interpolate(&spec.path));
            if !source.exists() {
                return Err(Error::ArtifactMissing {
                    name,
                    path: source.display().to_string(),
                });
            }

            // Reserve the name before touching the store
            {
                let mut names = self.staged_names.lock().await;
                if !names.insert(name.clone()) {
                    return Err(Error::ArtifactNameCollision { name });
                }
            }

            let dest = self.run_dir(run_id).join(&name);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let size_bytes = stage_path(&source, &dest).await?;
            debug!(name = %name, dest = %dest.display(), size_bytes, "Artifact staged");

            staged.push(StagedArtifact {
                id: ArtifactId::new(),
                name,
                instance_id: instance.id,
                path: dest,
                size_bytes,
            });
        }

        info!(
            run_id = %run_id,
            instance = %instance.display_name,
            count = staged.len(),
            "Artifacts collected"
        );
        Ok(staged)
    }

    /// Static collision check over all instances, run before anything
    /// executes. Templates that depend on step outputs cannot be
    /// expanded yet and are left to the collection-time guard.
    pub fn verify_unique_names(
        definition: &JobDefinition,
        instances: &[JobInstance],
        run_id: RunId,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in instances {
            let ctx = instance.context(run_id, variables);
            for spec in &definition.artifacts {
                if spec.name.contains("steps.") {
                    continue;
                }
                let name = ctx.interpolate(&spec.name);
                if !seen.insert(name.clone()) {
                    return Err(Error::ArtifactNameCollision { name });
                }
            }
        }
        Ok(())
    }
}

/// Copy a file or directory tree, returning the bytes copied.
async fn stage_path(source: &Path, dest: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(source).await?;
    if metadata.is_dir() {
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &dest))
            .await
            .map_err(|e| Error::Internal(format!("staging task failed: {}", e)))?
    } else {
        Ok(tokio::fs::copy(source, dest).await?)
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<u64> {
    std::fs::create_dir_all(dest)?;
    let mut total = 0u64;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            total += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            total += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(total)
}
