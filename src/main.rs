// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! buildflow - Declarative Multi-Stage Image Builder

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use buildflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    match cli.command {
        Commands::Init { name, force } => buildflow::cli::init::run(name, force, cli.verbose).await,
        Commands::Build(args) => buildflow::cli::build::run(args, cli.verbose).await,
        Commands::Watch { build, debounce } => {
            buildflow::cli::watch::run(build, debounce, cli.verbose).await
        }
        Commands::Validate { file, context } => {
            buildflow::cli::validate::run(file, context, cli.verbose).await
        }
        Commands::Cache { action } => buildflow::cli::cache::run(action, cli.verbose).await,
        Commands::Graph { file, format } => {
            buildflow::cli::graph::run(file, format, cli.verbose).await
        }
    }
}
