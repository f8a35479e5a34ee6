// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for buildflow.

pub mod build;
pub mod cache;
pub mod graph;
pub mod init;
pub mod validate;
pub mod watch;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::errors::{BuildError, RecoverySuggestion};
use crate::pipeline::{Pipeline, ReferencePolicy};

/// Default build file name
pub const DEFAULT_BUILD_FILE: &str = ".buildflow.yaml";

/// Multi-stage image builder
///
/// Build images from multi-stage build files and Dockerfiles.
#[derive(Parser, Debug)]
#[clap(
    name = "buildflow",
    version,
    about = "Declarative multi-stage image builder",
    long_about = None,
    after_help = "Examples:\n\
        buildflow init                        Scaffold a multi-stage build file\n\
        buildflow build                       Build the final stage\n\
        buildflow build --target builder      Build a single stage and its dependencies\n\
        buildflow build -f Dockerfile -o out  Build a Dockerfile and export the image\n\
        buildflow graph --format mermaid      Show the stage graph\n\n\
        See 'buildflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a multi-stage build for a Python web app
    Init {
        /// Image name (defaults to current directory name)
        name: Option<String>,

        /// Overwrite an existing build file
        #[clap(long)]
        force: bool,
    },

    /// Build the image
    Build(BuildArgs),

    /// Watch the build context and rebuild on changes
    Watch {
        #[clap(flatten)]
        build: BuildArgs,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },

    /// Validate a build file
    Validate {
        /// Build file to validate
        #[clap(default_value = DEFAULT_BUILD_FILE, env = "BUILDFLOW_FILE")]
        file: PathBuf,

        /// Build context used to check COPY sources
        #[clap(long, default_value = ".", env = "BUILDFLOW_CONTEXT")]
        context: PathBuf,
    },

    /// Cache management
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },

    /// Show the stage graph
    Graph {
        /// Build file
        #[clap(default_value = DEFAULT_BUILD_FILE, env = "BUILDFLOW_FILE")]
        file: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Options shared by `build` and `watch`
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Build file (YAML, TOML, JSON or Dockerfile)
    #[clap(short, long, default_value = DEFAULT_BUILD_FILE, env = "BUILDFLOW_FILE")]
    pub file: PathBuf,

    /// Build context directory
    #[clap(long, default_value = ".", env = "BUILDFLOW_CONTEXT")]
    pub context: PathBuf,

    /// Build this stage instead of the last one
    #[clap(short, long)]
    pub target: Option<String>,

    /// Skip the layer cache
    #[clap(long)]
    pub no_cache: bool,

    /// Record RUN commands without executing them
    #[clap(long)]
    pub dry_run: bool,

    /// Export the image to a directory
    #[clap(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Export the image to a .tar.gz archive
    #[clap(long, value_name = "FILE")]
    pub tar: Option<PathBuf>,

    /// Directory of stored base images
    #[clap(long, value_name = "DIR", env = "BUILDFLOW_IMAGES")]
    pub images: Option<PathBuf>,

    /// Store the image under this reference for later builds
    #[clap(long)]
    pub tag: Option<String>,

    /// Shell used for RUN (overrides the build file)
    #[clap(long)]
    pub shell: Option<String>,

    /// Forward reference policy (declare-before-use, full-graph)
    #[clap(long)]
    pub policy: Option<ReferencePolicy>,

    /// Do not pass the host environment to RUN
    #[clap(long)]
    pub clean_env: bool,
}

/// Cache management actions
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Clear the cache
    Clear {
        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load a build file
pub(crate) fn load_build(path: &Path) -> Result<Pipeline, BuildError> {
    let pipeline = Pipeline::from_file(path)?;
    tracing::debug!(
        build = %pipeline.name,
        stages = pipeline.stages.len(),
        path = %path.display(),
        "Loaded build file"
    );
    Ok(pipeline)
}

/// Print the recovery suggestion for an error, if there is one
pub(crate) fn print_recovery(error: &BuildError) {
    if let Some(suggestion) = RecoverySuggestion::for_error(error) {
        eprintln!();
        eprintln!("{}", suggestion.to_string().yellow());
    }
}
