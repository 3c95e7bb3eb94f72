//! `tdfs` -- build, export and push OCI images extended with a 2DFS field.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands, ImageCommands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            base,
            target,
            file,
            force_pull,
            export_as,
        } => commands::build::run(&base, &target, &file, force_pull, export_as.as_deref()).await,
        Commands::Image(image) => match image {
            ImageCommands::Ls { quiet } => commands::image::ls(quiet),
            ImageCommands::Rm { all, refs } => commands::image::rm(all, &refs),
            ImageCommands::Prune => commands::image::prune(),
            ImageCommands::Export {
                reference,
                target_file,
                platform,
            } => commands::image::export(&reference, &target_file, platform.as_deref()),
            ImageCommands::Push {
                reference,
                platform,
            } => commands::image::push(&reference, platform.as_deref()).await,
        },
        Commands::Version => {
            println!("tdfs version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
