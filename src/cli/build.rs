// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build command - build the image

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;

use super::{load_build, print_recovery, BuildArgs};
use crate::cache::FilesystemCache;
use crate::errors::{BuildError, BuildResult};
use crate::executors::{CommandRunner, DryRunRunner, ImageDirectory, ShellRunner};
use crate::image;
use crate::pipeline::{
    DagBuilder, ExecutionOptions, Pipeline, PipelineExecutor, PipelineResult, PipelineValidator,
    StageDescriptor,
};
use crate::snapshot::BuildContext;

/// Directory buildflow keeps its own state in; never part of the context
const STATE_DIR: &str = ".buildflow";

/// Run the build command
pub async fn run(args: BuildArgs, verbose: bool) -> Result<()> {
    let pipeline = match prepare(&args, verbose) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            print_recovery(&e);
            return Err(e.into());
        }
    };

    match build_and_export(&pipeline, &args, verbose).await {
        Ok(result) => {
            print_summary(&result, &args, verbose);
            Ok(())
        }
        Err(e) => {
            print_recovery(&e);
            Err(e.into())
        }
    }
}

/// Load and validate the build file
pub(crate) fn prepare(args: &BuildArgs, verbose: bool) -> BuildResult<Pipeline> {
    let mut pipeline = load_build(&args.file)?;

    if let Some(policy) = args.policy {
        pipeline.options.reference_policy = policy;
    }
    if let Some(ref shell) = args.shell {
        pipeline.options.shell = shell.clone();
    }

    let validation = PipelineValidator::validate(&pipeline)?;

    if !validation.is_valid() {
        eprintln!("{}", "Build validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        // Surface the structural error itself when there is one
        let descriptors = StageDescriptor::from_pipeline(&pipeline)?;
        DagBuilder::build(&descriptors, pipeline.options.reference_policy)?;
        return Err(BuildError::InvalidBuild {
            count: validation.errors.len(),
        });
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Build warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    Ok(pipeline)
}

/// Run one build and export the result as requested
pub(crate) async fn build_and_export(
    pipeline: &Pipeline,
    args: &BuildArgs,
    verbose: bool,
) -> BuildResult<PipelineResult> {
    let context = BuildContext::new(&args.context)?.with_excludes(&[STATE_DIR])?;

    let runner: Arc<dyn CommandRunner> = if args.dry_run {
        Arc::new(DryRunRunner::new())
    } else if args.clean_env {
        Arc::new(ShellRunner::new().with_clean_env())
    } else {
        Arc::new(ShellRunner::new())
    };

    let mut executor = PipelineExecutor::new(runner);

    if let Some(ref images) = args.images {
        executor = executor.with_base_images(Arc::new(ImageDirectory::new(images)));
    }

    if !args.no_cache && !args.dry_run && pipeline.cache.enabled {
        let cache = FilesystemCache::new(args.context.join(&pipeline.cache.directory))?;
        executor = executor.with_cache(Box::new(cache));
    }

    let options = ExecutionOptions {
        no_cache: args.no_cache,
        target: args.target.clone(),
        progress: true,
        verbose,
    };

    let result = executor.execute(pipeline, &context, &options).await?;

    if let Some(ref dir) = args.output {
        image::export_dir(&result.artifact, dir)?;
    }
    if let Some(ref path) = args.tar {
        image::export_tar(&result.artifact, path)?;
    }
    if let Some(ref tag) = args.tag {
        let store = image_store(args)?;
        store.save(tag, &result.artifact)?;
    }

    Ok(result)
}

fn image_store(args: &BuildArgs) -> BuildResult<ImageDirectory> {
    let root: PathBuf = args
        .images
        .clone()
        .or_else(ImageDirectory::default_location)
        .ok_or_else(|| BuildError::FileWriteError {
            path: PathBuf::from("images"),
            error: "no image directory available; pass --images".into(),
        })?;
    Ok(ImageDirectory::new(root))
}

fn print_summary(result: &PipelineResult, args: &BuildArgs, verbose: bool) {
    let artifact = &result.artifact;

    println!();
    println!("{}:", "Image".bold());
    println!("  Stage:   {}", artifact.stage());
    println!("  Digest:  {}", artifact.digest().cyan());
    println!(
        "  Files:   {} ({} bytes)",
        artifact.rootfs().file_count(),
        artifact.rootfs().total_size()
    );
    if let Some(port) = artifact.exposed_port() {
        println!("  Port:    {}", port);
    }
    if !artifact.default_command().is_empty() {
        println!("  Command: {:?}", artifact.default_command());
    }

    if verbose {
        if !artifact.env().is_empty() {
            println!("  Env:");
            for (key, value) in artifact.env() {
                println!("    {}={}", key, value);
            }
        }
        let hits = result.cache_hits();
        if hits > 0 {
            println!("  Cached:  {} layer{}", hits, if hits == 1 { "" } else { "s" });
        }
    }

    if args.dry_run {
        println!();
        println!("{}", "Dry run: RUN instructions were not executed.".dimmed());
    }
    if let Some(ref dir) = args.output {
        println!("  {} Exported to {}", "✓".green(), dir.display());
    }
    if let Some(ref path) = args.tar {
        println!("  {} Archived to {}", "✓".green(), path.display());
    }
    if let Some(ref tag) = args.tag {
        println!("  {} Stored as {}", "✓".green(), tag.cyan());
    }
}
