//! Interpolation and condition evaluation over one instance's context.
//!
//! Conditions are pure functions of the instance context: matrix axis
//! values, the run identity, declared variables, and the statuses and
//! outputs of prior steps. The evaluator never reads the process
//! environment.

use crate::job::ConditionExpression;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;

/// Context for `${{ ... }}` interpolation and condition evaluation.
#[derive(Debug, Clone, Default)]
pub struct InstanceContext {
    /// Run identifier, rendered for `run.id`.
    pub run_id: String,
    /// Declared job and step variables.
    pub variables: HashMap<String, String>,
    /// Matrix axis values for this instance, in declaration order.
    pub matrix: IndexMap<String, String>,
    /// Prior step statuses: step name -> "succeeded" | "failed" | "skipped" | ...
    pub statuses: HashMap<String, String>,
    /// Prior step outputs: "step_name.output_key" -> value
    pub outputs: HashMap<String, String>,
}

impl InstanceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ matrix.key }}` - matrix axis value
    /// - `${{ run.id }}` - run identifier
    /// - `${{ steps.name.status }}` - prior step status
    /// - `${{ steps.name.outputs.key }}` - prior step output
    /// - `${{ variable }}` - declared variable
    pub fn interpolate(&self, input: &str) -> String {
        let re = Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").unwrap();

        re.replace_all(input, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
            self.resolve_expression(expr)
        })
        .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if expr == "run.id" {
            return self.run_id.clone();
        }

        if let Some(rest) = expr.strip_prefix("steps.") {
            if let Some(outputs_idx) = rest.find(".outputs.") {
                let step_name = &rest[..outputs_idx];
                let output_key = &rest[outputs_idx + ".outputs.".len()..];
                let lookup_key = format!("{}.{}", step_name, output_key);
                return self.outputs.get(&lookup_key).cloned().unwrap_or_default();
            }
            if let Some(step_name) = rest.strip_suffix(".status") {
                return self.statuses.get(step_name).cloned().unwrap_or_default();
            }
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }

    /// Evaluate a condition expression. `if` must hold and `unless` must
    /// not; an absent clause places no constraint.
    pub fn evaluate_condition(&self, condition: &ConditionExpression) -> bool {
        if let Some(expr) = &condition.if_expr
            && !self.evaluate_string_expression(expr)
        {
            return false;
        }
        if let Some(expr) = &condition.unless
            && self.evaluate_string_expression(expr)
        {
            return false;
        }
        true
    }

    /// Evaluate a simple string expression (equality, inequality, contains).
    fn evaluate_string_expression(&self, expr: &str) -> bool {
        let interpolated = self.interpolate(expr);
        let trimmed = interpolated.trim();

        if trimmed == "true" {
            return true;
        }
        if trimmed == "false" {
            return false;
        }

        if let Some((left, right)) = trimmed.split_once("==") {
            return self.operand(left) == self.operand(right);
        }
        if let Some((left, right)) = trimmed.split_once("!=") {
            return self.operand(left) != self.operand(right);
        }
        if let Some((left, right)) = trimmed.split_once(" contains ") {
            return self.operand(left).contains(&self.operand(right));
        }

        // Unrecognised expressions are false (safe default)
        false
    }

    /// Resolve one comparison operand: a quoted string is taken
    /// literally, a context path (`matrix.*`, `run.*`, `steps.*`) is
    /// resolved, and anything else is tried as a variable name before
    /// falling back to its own text.
    fn operand(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        for quote in ['\'', '"'] {
            if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
                return trimmed[1..trimmed.len() - 1].to_string();
            }
        }
        if trimmed.starts_with("matrix.")
            || trimmed.starts_with("run.")
            || trimmed.starts_with("steps.")
        {
            return self.resolve_expression(trimmed);
        }
        self.variables
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}
