//! PromptDJ CLI - Headless Playback Engine
//!
//! Command-line interface for the PromptDJ playback engine.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use promptdj::cli::{commands, Cli, Commands};
use promptdj::EngineError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("PromptDJ v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(engine_err) = err.downcast_ref::<EngineError>() {
                eprint!("{}", commands::recovery_hints(engine_err));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Some(Commands::Render(args)) => {
            commands::render(config, &args)
                .await
                .with_context(|| format!("rendering to {}", args.output.display()))?;
        }
        Some(Commands::ShowConfig) => commands::show_config(&config)?,
        None => {
            println!("PromptDJ v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
        }
    }
    Ok(())
}
