// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Validate command - check a build file

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_build, print_recovery};
use crate::errors::BuildError;
use crate::pipeline::{PipelineValidator, StageDescriptor};
use crate::snapshot::BuildContext;
use crate::utils;

/// Run the validate command
pub async fn run(file: PathBuf, context: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating build...".bold());
    println!();

    let pipeline = match load_build(&file) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  {} Failed to parse build file", "✗".red());
            print_recovery(&e);
            return Err(e.into());
        }
    };

    utils::print_success(&format!(
        "{} parsed ({} stage{})",
        file.display(),
        pipeline.stages.len(),
        if pipeline.stages.len() == 1 { "" } else { "s" }
    ));

    let validation = PipelineValidator::validate(&pipeline)?;

    // Sources are only checked against a real context directory
    let missing_sources = if context.is_dir() {
        let context = BuildContext::new(&context)?;
        PipelineValidator::validate_sources(&pipeline, &context)?
    } else {
        Vec::new()
    };

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        utils::print_section(&"Errors".red().to_string());
        for error in &validation.errors {
            utils::print_error(error);
        }
    }

    if !missing_sources.is_empty() {
        has_issues = true;
        utils::print_section(&"Missing sources".yellow().to_string());
        for missing in &missing_sources {
            utils::print_warning(missing);
        }
    }

    if !validation.warnings.is_empty() {
        utils::print_section(&"Warnings".yellow().to_string());
        for warning in &validation.warnings {
            utils::print_warning(warning);
        }
    }

    if verbose && validation.is_valid() {
        utils::print_section("Build summary");
        println!("  Name: {}", pipeline.name);
        println!("  Reference policy: {}", pipeline.options.reference_policy);
        for descriptor in StageDescriptor::from_pipeline(&pipeline)? {
            println!(
                "    - {} (from {}, {} instructions)",
                descriptor.name(),
                descriptor.base(),
                descriptor.instructions().len()
            );
        }
    }

    println!();

    if !has_issues {
        println!("{}", "Build file is valid!".green().bold());
        return Ok(());
    }

    if validation.is_valid() && missing_sources.is_empty() {
        println!("{}", "Build file is valid but has warnings.".yellow().bold());
        Ok(())
    } else if !validation.is_valid() {
        Err(BuildError::InvalidBuild {
            count: validation.errors.len(),
        }
        .into())
    } else {
        Err(miette::miette!(
            "{} COPY source(s) missing from the build context",
            missing_sources.len()
        ))
    }
}
