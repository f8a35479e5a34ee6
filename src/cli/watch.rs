// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Watch command - rebuild on changes to the build context

use colored::Colorize;
use miette::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::Duration;

use super::build::{build_and_export, prepare};
use super::{print_recovery, BuildArgs};

/// Run the watch command
pub async fn run(args: BuildArgs, debounce_ms: u64, verbose: bool) -> Result<()> {
    if !args.file.exists() {
        return Err(miette::miette!(
            "Build file not found: {}\n\n\
             Run 'buildflow init' to create one.",
            args.file.display()
        ));
    }

    println!("{}", "Starting watch mode...".bold());
    println!(
        "Watching {} for changes (debounce: {}ms)",
        args.context.display(),
        debounce_ms
    );
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, rx) = channel();

    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), tx)
        .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    debouncer
        .watcher()
        .watch(&args.context, RecursiveMode::Recursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    // The build file may live outside the context
    if !args.file.starts_with(&args.context) {
        debouncer
            .watcher()
            .watch(&args.file, RecursiveMode::NonRecursive)
            .map_err(|e| miette::miette!("Failed to watch build file: {}", e))?;
    }

    rebuild(&args, verbose).await;

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let relevant: Vec<_> = events
                    .iter()
                    .filter(|e| !is_own_output(&e.path, &args))
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .collect();

                if !relevant.is_empty() {
                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );

                    if verbose {
                        for event in &relevant {
                            println!("  {}", event.path.display());
                        }
                    }

                    println!();
                    rebuild(&args, verbose).await;
                }
            }
            Ok(Err(e)) => {
                eprintln!("{}: {:?}", "Watch error".red(), e);
            }
            Err(e) => {
                eprintln!("{}: {}", "Channel error".red(), e);
                break;
            }
        }
    }

    Ok(())
}

/// Whether a changed path was written by the build itself
fn is_own_output(path: &Path, args: &BuildArgs) -> bool {
    let path = path.to_string_lossy();
    if path.contains(".buildflow") {
        return true;
    }

    [&args.output, &args.tar].into_iter().flatten().any(|out| {
        let out = out.to_string_lossy();
        let out = out.trim_start_matches("./");
        !out.is_empty() && path.contains(out)
    })
}

async fn rebuild(args: &BuildArgs, verbose: bool) {
    let start = std::time::Instant::now();

    let pipeline = match prepare(args, verbose) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load build".red(), e);
            return;
        }
    };

    match build_and_export(&pipeline, args, verbose).await {
        Ok(result) => {
            println!(
                "{} {} ({:.2}s)",
                "Image".green(),
                result.artifact.digest().cyan(),
                start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("{}: {}", "Build failed".red(), e);
            print_recovery(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[clap(flatten)]
        args: BuildArgs,
    }

    #[test]
    fn test_own_output_is_ignored() {
        let harness = Harness::parse_from(["test", "--output", "out", "--tar", "image.tar.gz"]);

        assert!(is_own_output(Path::new("./.buildflow/cache/ab/cd.json"), &harness.args));
        assert!(is_own_output(Path::new("/work/out/rootfs/app/main.py"), &harness.args));
        assert!(is_own_output(Path::new("/work/image.tar.gz"), &harness.args));
        assert!(!is_own_output(Path::new("/work/src/main.py"), &harness.args));
    }
}
