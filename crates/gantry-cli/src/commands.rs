//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a starter job description
    Init,

    /// Validate a job description
    Validate {
        /// Path to the job file (discovered if omitted)
        path: Option<String>,
    },

    /// Print the expanded matrix instances without running them
    Expand {
        /// Path to the job file (discovered if omitted)
        path: Option<String>,
    },

    /// Print the JSON Schema for job descriptions
    Schema,

    /// Execute a run locally
    Run {
        /// Path to the job file (discovered if omitted)
        path: Option<String>,

        /// Cancel not-yet-started instances after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Root of the artifact output area
        #[arg(long, default_value = "artifacts")]
        output_dir: PathBuf,

        /// Extra variables, key=value (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Only run if the job's trigger policy matches a push to this branch
        #[arg(short, long)]
        branch: Option<String>,
    },
}
