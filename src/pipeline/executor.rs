// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build executor
//!
//! Runs the stages of a build in dependency order, seals each stage as soon
//! as its last instruction has been applied and assembles the image from the
//! target stage.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::cache::Cache;
use crate::errors::{BuildError, BuildResult};
use crate::executors::{
    BaseImageProvider, CommandRunner, InstructionExecutor, InstructionSite, ScratchImages,
};
use crate::image::ImageArtifact;
use crate::pipeline::{lookup, BaseRef, DagBuilder, Instruction, Pipeline, StageDescriptor};
use crate::snapshot::{BuildContext, SealedSnapshot, Snapshot, StageState, StageStore};
use crate::utils;

/// Build execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Skip cache lookups and stores
    pub no_cache: bool,
    /// Stage to build instead of the last declared one
    pub target: Option<String>,
    /// Print the plan and per-stage progress
    pub progress: bool,
    /// Verbose output
    pub verbose: bool,
}

/// Lifecycle of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of one executed stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    /// Number of instructions applied
    pub instructions: usize,
    /// `RUN` instructions replayed from the layer cache
    pub cache_hits: usize,
    pub duration: Duration,
    /// Stage snapshots dropped once this stage sealed
    pub released: Vec<String>,
}

/// Result of a successful build
#[derive(Debug)]
pub struct PipelineResult {
    /// The assembled image
    pub artifact: ImageArtifact,
    /// Executed stages in execution order
    pub stages: Vec<StageReport>,
    /// Every stage state change in the order it happened
    pub transitions: Vec<(String, StageState)>,
    /// Stages whose snapshots were still held when the build finished
    pub retained: Vec<String>,
    /// Total execution time
    pub duration: Duration,
}

impl PipelineResult {
    /// Total number of cache hits across stages
    pub fn cache_hits(&self) -> usize {
        self.stages.iter().map(|s| s.cache_hits).sum()
    }
}

/// Build executor
///
/// Each executor runs exactly one build. A failed build is final and
/// produces no artifact.
pub struct PipelineExecutor {
    /// Runner for `RUN` instructions
    runner: Arc<dyn CommandRunner>,
    /// Source of external base images
    base_images: Arc<dyn BaseImageProvider>,
    /// Layer cache
    cache: Option<Arc<RwLock<Box<dyn Cache>>>>,
    state: BuildState,
}

impl PipelineExecutor {
    /// Create a new executor; external base images start empty
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            base_images: Arc::new(ScratchImages),
            cache: None,
            state: BuildState::NotStarted,
        }
    }

    /// Set the base image provider
    pub fn with_base_images(mut self, provider: Arc<dyn BaseImageProvider>) -> Self {
        self.base_images = provider;
        self
    }

    /// Set the layer cache
    pub fn with_cache(mut self, cache: Box<dyn Cache>) -> Self {
        self.cache = Some(Arc::new(RwLock::new(cache)));
        self
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Execute a build
    #[instrument(skip_all, fields(build = %pipeline.name))]
    pub async fn execute(
        &mut self,
        pipeline: &Pipeline,
        context: &BuildContext,
        options: &ExecutionOptions,
    ) -> BuildResult<PipelineResult> {
        if self.state != BuildState::NotStarted {
            return Err(BuildError::ExecutorReused);
        }

        self.state = BuildState::Running;
        match self.run_build(pipeline, context, options).await {
            Ok(result) => {
                self.state = BuildState::Completed;
                Ok(result)
            }
            Err(e) => {
                self.state = BuildState::Failed;
                tracing::debug!(error = %e, "Build failed");
                Err(e)
            }
        }
    }

    async fn run_build(
        &self,
        pipeline: &Pipeline,
        context: &BuildContext,
        options: &ExecutionOptions,
    ) -> BuildResult<PipelineResult> {
        let start = Instant::now();

        // Structural checks happen before any stage runs
        let descriptors = StageDescriptor::from_pipeline(pipeline)?;
        let dag = DagBuilder::build(&descriptors, pipeline.options.reference_policy)?;
        let order = dag.topological_order()?;

        let target = match options.target.as_deref() {
            Some(reference) => lookup(&descriptors, reference)
                .ok_or_else(|| BuildError::UnknownTarget {
                    target: reference.to_string(),
                })?
                .index(),
            None => descriptors.len() - 1,
        };

        let required = dag.required_for(target);
        let plan: Vec<usize> = order.into_iter().filter(|i| required.contains(i)).collect();

        let shell = pipeline.options.shell.as_str();
        let needs_runner = plan.iter().any(|&i| {
            descriptors[i]
                .instructions()
                .iter()
                .any(|inst| matches!(inst, Instruction::Run { .. }))
        });
        if needs_runner && !self.runner.check_available(shell).await? {
            return Err(BuildError::RunnerFailed {
                runner: self.runner.name().to_string(),
                error: format!("Shell '{}' not found", shell),
                help: Some("Install the shell or set options.shell in the build file".into()),
            });
        }

        if options.progress {
            self.print_execution_plan(pipeline, &descriptors, &plan, &dag);
        }

        // Planned dependents still to run, per stage
        let mut pending: HashMap<usize, usize> = HashMap::new();
        for &index in &plan {
            for dependency in dag.dependencies_of(index) {
                *pending.entry(dependency).or_default() += 1;
            }
        }

        let cache = if options.no_cache {
            None
        } else {
            self.cache.as_deref()
        };

        let mut store = StageStore::new(&descriptors);
        let mut reports = Vec::with_capacity(plan.len());
        let mut image: Option<SealedSnapshot> = None;

        for &index in &plan {
            let descriptor = &descriptors[index];
            let (sealed, mut report) = self
                .execute_stage(descriptor, &mut store, context, cache, shell, options)
                .await?;

            if index == target {
                image = Some(sealed);
            }

            for dependency in dag.dependencies_of(index) {
                let Some(count) = pending.get_mut(&dependency) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 && dependency != target {
                    let name = descriptors[dependency].name();
                    store.release(name);
                    report.released.push(name.to_string());
                }
            }
            reports.push(report);
        }

        let retained: Vec<String> = plan
            .iter()
            .map(|&index| descriptors[index].name())
            .filter(|name| store.is_retained(name))
            .map(str::to_string)
            .collect();

        let target_name = descriptors[target].name();
        let rootfs = image.ok_or_else(|| BuildError::UnknownTarget {
            target: target_name.to_string(),
        })?;
        let artifact = ImageArtifact::assemble(target_name, rootfs);
        let duration = start.elapsed();

        tracing::info!(
            target = target_name,
            stages = reports.len(),
            digest = %artifact.digest(),
            "Build completed"
        );

        if options.progress {
            println!();
            println!(
                "{}",
                format!("Build completed successfully in {:.2}s", duration.as_secs_f64()).green()
            );
        }

        Ok(PipelineResult {
            artifact,
            stages: reports,
            transitions: store.transitions().to_vec(),
            retained,
            duration,
        })
    }

    /// Execute a single stage and seal it
    async fn execute_stage(
        &self,
        descriptor: &StageDescriptor,
        store: &mut StageStore,
        context: &BuildContext,
        cache: Option<&RwLock<Box<dyn Cache>>>,
        shell: &str,
        options: &ExecutionOptions,
    ) -> BuildResult<(SealedSnapshot, StageReport)> {
        let name = descriptor.name();
        let start = Instant::now();

        let spinner = options
            .progress
            .then(|| utils::create_spinner(&format!("{}...", name)));

        store.begin(name)?;
        tracing::info!(stage = name, base = %descriptor.base(), "Executing stage");

        let outcome = self
            .apply_instructions(descriptor, store, context, cache, shell)
            .await;

        let (snapshot, cache_hits) = match outcome {
            Ok(applied) => applied,
            Err(e) => {
                if let Some(spinner) = spinner {
                    spinner.finish_and_clear();
                    utils::print_error(&format!("{} failed", name.bold()));
                    if options.verbose {
                        if let BuildError::CommandExecution { stderr, .. } = &e {
                            eprintln!("{}", stderr.dimmed());
                        }
                    }
                }
                return Err(e);
            }
        };

        let sealed = store.seal(name, snapshot)?;
        let duration = start.elapsed();

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
            let note = if cache_hits > 0 {
                format!(" {}", format!("({} cached)", cache_hits).dimmed())
            } else {
                String::new()
            };
            utils::print_success(&format!(
                "{} ({:.2}s){}",
                name.bold(),
                duration.as_secs_f64(),
                note
            ));
        }

        Ok((
            sealed,
            StageReport {
                name: name.to_string(),
                instructions: descriptor.instructions().len(),
                cache_hits,
                duration,
                released: Vec::new(),
            },
        ))
    }

    async fn apply_instructions(
        &self,
        descriptor: &StageDescriptor,
        store: &StageStore,
        context: &BuildContext,
        cache: Option<&RwLock<Box<dyn Cache>>>,
        shell: &str,
    ) -> BuildResult<(Snapshot, usize)> {
        let name = descriptor.name();

        let mut snapshot = match descriptor.base() {
            BaseRef::Scratch => Snapshot::empty(),
            BaseRef::Image(reference) => self.base_images.load(reference)?,
            BaseRef::Stage(reference) => store.sealed(name, reference)?.to_snapshot(),
        };

        let mut executor = InstructionExecutor::new(context, store, self.runner.as_ref(), shell);
        if let Some(cache) = cache {
            executor = executor.with_cache(cache);
        }

        let mut cache_hits = 0;
        for (index, instruction) in descriptor.instructions().iter().enumerate() {
            let applied = executor
                .apply(snapshot, instruction, InstructionSite { stage: name, index })
                .await?;
            if applied.cache_hit {
                cache_hits += 1;
            }
            snapshot = applied.snapshot;
        }

        Ok((snapshot, cache_hits))
    }

    /// Print the execution plan
    fn print_execution_plan(
        &self,
        pipeline: &Pipeline,
        descriptors: &[StageDescriptor],
        plan: &[usize],
        dag: &DagBuilder,
    ) {
        println!();
        utils::print_header(&format!("Build: {}", pipeline.name));
        println!(
            "Execution plan ({} stage{}):",
            plan.len(),
            if plan.len() == 1 { "" } else { "s" }
        );
        println!();

        for (i, &index) in plan.iter().enumerate() {
            let descriptor = &descriptors[index];
            let deps = dag.dependencies(descriptor.name()).unwrap_or_default();

            print!(
                "  {}. {} (from {})",
                i + 1,
                descriptor.name().bold(),
                descriptor.base()
            );

            if !deps.is_empty() {
                print!(" {}", format!("[depends: {}]", deps.join(", ")).dimmed());
            }

            println!();
        }

        println!();
    }
}
