//! Gantry CLI entrypoint.

use clap::Parser;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry build orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => handlers::init().await?,
        Commands::Validate { path } => handlers::validate(path.as_deref()).await?,
        Commands::Expand { path } => handlers::expand(path.as_deref()).await?,
        Commands::Schema => handlers::schema()?,
        Commands::Run {
            path,
            fail_fast,
            output_dir,
            vars,
            branch,
        } => {
            let succeeded =
                handlers::run(path.as_deref(), fail_fast, output_dir, vars, branch).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
