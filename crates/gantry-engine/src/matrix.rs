//! Matrix expansion into independent job instances.

use gantry_core::error::{Error, Result};
use gantry_core::instance::JobInstance;
use gantry_core::job::{JobDefinition, MatrixConfig};
use indexmap::IndexMap;

/// Expander for matrix configurations.
///
/// Pure: produces the Cartesian product of the declared axes as an
/// ordered sequence of instances, preserving axis declaration order.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix into concrete instances.
    ///
    /// A job without a matrix yields exactly one instance with no axis
    /// bindings. An axis with zero values is a configuration error.
    pub fn expand(&self, definition: &JobDefinition) -> Result<Vec<JobInstance>> {
        let combinations = match &definition.matrix {
            Some(matrix) => self.combinations(matrix)?,
            None => vec![IndexMap::new()],
        };

        Ok(combinations
            .into_iter()
            .enumerate()
            .map(|(idx, axes)| {
                let display_name = self.format_display_name(&definition.name, &axes);
                JobInstance::new(idx, axes, display_name, &definition.steps)
            })
            .collect())
    }

    fn combinations(
        &self,
        matrix: &MatrixConfig,
    ) -> Result<Vec<IndexMap<String, serde_json::Value>>> {
        for (axis, values) in &matrix.axes {
            if values.is_empty() {
                return Err(Error::Configuration(format!(
                    "matrix axis '{}' has no values",
                    axis
                )));
            }
        }

        let mut result = vec![IndexMap::new()];

        for (key, values) in &matrix.axes {
            let mut new_result = Vec::new();

            for combo in result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(key.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        // Apply includes
        for include in &matrix.include {
            if !result.contains(include) {
                result.push(include.clone());
            }
        }

        // Apply excludes
        result.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(combo, exclude))
        });

        Ok(result)
    }

    fn matches_exclude(
        &self,
        combo: &IndexMap<String, serde_json::Value>,
        exclude: &IndexMap<String, serde_json::Value>,
    ) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(
        &self,
        job_name: &str,
        axes: &IndexMap<String, serde_json::Value>,
    ) -> String {
        if axes.is_empty() {
            return job_name.to_string();
        }

        let parts: Vec<String> = axes
            .iter()
            .map(|(k, v)| {
                let v_str = match v {
                    serde_json::Value::String(s) => s.clone(),
                    _ => v.to_string(),
                };
                format!("{}={}", k, v_str)
            })
            .collect();

        format!("{} ({})", job_name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
