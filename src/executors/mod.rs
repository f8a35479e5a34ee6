// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Instruction execution
//!
//! This module provides the [`InstructionExecutor`], which applies a single
//! instruction to a stage snapshot, together with the pluggable pieces it
//! relies on: command runners for `RUN` and base image providers for `FROM`.

mod base;
mod dry_run;
mod shell;

pub use base::{BaseImageProvider, ImageDirectory, ScratchImages};
pub use dry_run::DryRunRunner;
pub use shell::ShellRunner;

use async_trait::async_trait;
use regex::{Captures, Regex};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

use crate::cache::{Cache, CachedLayer, ContentHasher};
use crate::errors::{BuildError, BuildResult};
use crate::pipeline::Instruction;
use crate::snapshot::{BuildContext, Change, Snapshot, StageStore, Subtree};

/// Result of running a command against a snapshot
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Filesystem delta produced by the command
    pub changes: Vec<Change>,

    /// Execution duration
    pub duration: Duration,
}

impl RunOutcome {
    /// Create a successful outcome
    pub fn success(stdout: String, changes: Vec<Change>, duration: Duration) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr: String::new(),
            changes,
            duration,
        }
    }

    /// Create a failed outcome
    pub fn failure(exit_code: i32, stderr: String, duration: Duration) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr,
            changes: Vec::new(),
            duration,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for `RUN` command runners
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runner name for messages
    fn name(&self) -> &str;

    /// Run `command` with `shell` against `snapshot`
    ///
    /// A non-zero exit is reported through [`RunOutcome::exit_code`]; an
    /// error means the command could not be started at all.
    async fn run(&self, snapshot: &Snapshot, command: &str, shell: &str) -> BuildResult<RunOutcome>;

    /// Check if the runner can execute commands with `shell`
    async fn check_available(&self, shell: &str) -> BuildResult<bool>;

    /// Whether results may be stored in and replayed from the layer cache
    fn cacheable(&self) -> bool {
        true
    }

    /// Identifies runner settings that change what a command observes
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }
}

/// Position of an instruction, used for error reporting
#[derive(Debug, Clone, Copy)]
pub struct InstructionSite<'a> {
    pub stage: &'a str,
    pub index: usize,
}

/// Snapshot produced by one instruction
#[derive(Debug)]
pub struct Applied {
    pub snapshot: Snapshot,
    /// Whether a `RUN` was replayed from the layer cache
    pub cache_hit: bool,
}

impl Applied {
    fn fresh(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            cache_hit: false,
        }
    }
}

/// Applies instructions to snapshots
///
/// Holds only shared references; every call takes a snapshot and returns a
/// new one.
pub struct InstructionExecutor<'a> {
    context: &'a BuildContext,
    stages: &'a StageStore,
    runner: &'a dyn CommandRunner,
    cache: Option<&'a RwLock<Box<dyn Cache>>>,
    shell: &'a str,
}

impl<'a> InstructionExecutor<'a> {
    pub fn new(
        context: &'a BuildContext,
        stages: &'a StageStore,
        runner: &'a dyn CommandRunner,
        shell: &'a str,
    ) -> Self {
        Self {
            context,
            stages,
            runner,
            cache: None,
            shell,
        }
    }

    /// Replay and record `RUN` results through `cache`
    pub fn with_cache(mut self, cache: &'a RwLock<Box<dyn Cache>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Apply one instruction
    pub async fn apply(
        &self,
        mut snapshot: Snapshot,
        instruction: &Instruction,
        site: InstructionSite<'_>,
    ) -> BuildResult<Applied> {
        tracing::debug!(stage = site.stage, index = site.index, "{}", instruction);

        match instruction {
            Instruction::Env { key, value } => {
                let value = self.expand(&snapshot, value);
                snapshot.config_mut().env.insert(key.clone(), value);
                Ok(Applied::fresh(snapshot))
            }

            Instruction::Workdir { path } => {
                let path = snapshot.resolve(&self.expand(&snapshot, path));
                snapshot.mkdir_all(&path);
                snapshot.config_mut().workdir = path;
                Ok(Applied::fresh(snapshot))
            }

            Instruction::Run { command } => self.run(snapshot, instruction, command, site).await,

            Instruction::Copy { from, src, dest } => {
                let dest = self.expand(&snapshot, dest);
                let mut matches = Vec::new();

                for pattern in src.patterns() {
                    let pattern = self.expand(&snapshot, pattern);
                    let found = match from {
                        Some(stage_ref) => self.resolve_stage(site.stage, stage_ref, &pattern)?,
                        None => self.context.resolve(&pattern)?,
                    };

                    if found.is_empty() {
                        return Err(BuildError::SourceNotFound {
                            stage: site.stage.to_string(),
                            index: site.index,
                            instruction: instruction.to_string(),
                            path: pattern,
                            origin: match from {
                                Some(stage_ref) => format!("stage '{}'", stage_ref),
                                None => "the build context".to_string(),
                            },
                        });
                    }
                    matches.extend(found);
                }

                let into_dir = dest.ends_with('/');
                if matches.len() > 1 && !into_dir && !snapshot.is_dir(&dest) {
                    return Err(BuildError::InvalidInstruction {
                        stage: site.stage.to_string(),
                        index: site.index,
                        reason: format!(
                            "copying {} sources requires a directory destination ending with '/'",
                            matches.len()
                        ),
                    });
                }

                let into_dir = into_dir || matches.len() > 1;
                for (name, subtree) in matches {
                    snapshot.graft(subtree, &dest, &name, into_dir);
                }
                Ok(Applied::fresh(snapshot))
            }

            Instruction::Expose { port } => {
                if *port == 0 {
                    return Err(BuildError::InvalidInstruction {
                        stage: site.stage.to_string(),
                        index: site.index,
                        reason: "port must be between 1 and 65535".to_string(),
                    });
                }
                snapshot.config_mut().exposed_port = Some(*port);
                Ok(Applied::fresh(snapshot))
            }

            Instruction::Cmd { args } => {
                snapshot.config_mut().cmd = args.clone();
                Ok(Applied::fresh(snapshot))
            }

            Instruction::Label { key, value } => {
                let value = self.expand(&snapshot, value);
                snapshot.config_mut().labels.insert(key.clone(), value);
                Ok(Applied::fresh(snapshot))
            }
        }
    }

    async fn run(
        &self,
        mut snapshot: Snapshot,
        instruction: &Instruction,
        command: &str,
        site: InstructionSite<'_>,
    ) -> BuildResult<Applied> {
        let cache = self.cache.filter(|_| self.runner.cacheable());
        let key = cache.map(|_| {
            ContentHasher::layer_key(
                &snapshot.digest(),
                command,
                self.shell,
                &self.runner.fingerprint(),
            )
        });

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            match cache.read().await.get(key).await {
                Ok(Some(layer)) => {
                    tracing::debug!(stage = site.stage, key, "Layer cache hit");
                    snapshot.apply(&layer.changes);
                    return Ok(Applied {
                        snapshot,
                        cache_hit: true,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Cache lookup failed: {}", e),
            }
        }

        let outcome = self.runner.run(&snapshot, command, self.shell).await?;

        if !outcome.succeeded() {
            return Err(BuildError::command_failed(
                site.stage,
                site.index,
                instruction.to_string(),
                outcome.exit_code,
                outcome.stderr,
            ));
        }

        if let (Some(cache), Some(key)) = (cache, key) {
            let layer = CachedLayer {
                timestamp: SystemTime::now(),
                stage_name: site.stage.to_string(),
                cache_key: key,
                command: command.to_string(),
                changes: outcome.changes.clone(),
                duration_ms: outcome.duration.as_millis() as u64,
            };
            if let Err(e) = cache.write().await.store(&layer).await {
                tracing::warn!("Failed to cache layer: {}", e);
            }
        }

        snapshot.apply(&outcome.changes);
        Ok(Applied::fresh(snapshot))
    }

    /// Resolve a source inside a sealed stage, expanding glob patterns
    fn resolve_stage(
        &self,
        requester: &str,
        stage_ref: &str,
        pattern: &str,
    ) -> BuildResult<Vec<(String, Subtree)>> {
        if !pattern.contains(['*', '?', '['].as_slice()) {
            return Ok(self
                .stages
                .resolve(requester, stage_ref, pattern)?
                .map(|tree| vec![(crate::snapshot::base_name(pattern).to_string(), tree)])
                .unwrap_or_default());
        }

        let sealed = self.stages.sealed(requester, stage_ref)?;
        let absolute = crate::snapshot::normalize_path("/", pattern);
        let glob = glob::Pattern::new(&absolute)?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        Ok(sealed
            .entries()
            .keys()
            .filter(|path| glob.matches_with(path, options))
            .filter_map(|path| {
                sealed
                    .subtree(path)
                    .map(|tree| (crate::snapshot::base_name(path).to_string(), tree))
            })
            .collect())
    }

    fn expand(&self, snapshot: &Snapshot, text: &str) -> String {
        let env = &snapshot.config().env;
        expand_vars(text, |name| Some(env.get(name).cloned().unwrap_or_default()))
    }
}

/// Expand `$NAME` and `${NAME}` references
///
/// Names for which `lookup` returns `None` are left as written.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static VARIABLE: OnceLock<Regex> = OnceLock::new();

    if !input.contains('$') {
        return input.to_string();
    }

    let re = VARIABLE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("Invalid variable pattern")
    });

    re.replace_all(input, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        lookup(name).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CopySources, Stage, StageDescriptor};
    use crate::snapshot::Entry;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn site(index: usize) -> InstructionSite<'static> {
        InstructionSite {
            stage: "runtime",
            index,
        }
    }

    fn store(names: &[&str]) -> StageStore {
        let stages: Vec<Stage> = names
            .iter()
            .map(|n| Stage {
                name: Some(n.to_string()),
                description: None,
                from: "scratch".into(),
                steps: vec![],
            })
            .collect();
        StageStore::new(&StageDescriptor::from_stages(&stages).unwrap())
    }

    fn context() -> (TempDir, BuildContext) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();
        std::fs::write(dir.path().join("a.py"), "a").unwrap();
        std::fs::write(dir.path().join("b.py"), "b").unwrap();
        let context = BuildContext::new(dir.path()).unwrap();
        (dir, context)
    }

    #[test]
    fn test_expand_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([("HOME", "/root"), ("APP", "web")]);
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());

        assert_eq!(expand_vars("$HOME/${APP}/bin", lookup), "/root/web/bin");
        assert_eq!(expand_vars("$MISSING/x", lookup), "$MISSING/x");
        assert_eq!(expand_vars("plain", lookup), "plain");
    }

    #[tokio::test]
    async fn test_env_and_workdir() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let applied = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Env {
                    key: "APP_HOME".into(),
                    value: "/srv".into(),
                },
                site(0),
            )
            .await
            .unwrap();
        let applied = executor
            .apply(
                applied.snapshot,
                &Instruction::Workdir {
                    path: "$APP_HOME/app".into(),
                },
                site(1),
            )
            .await
            .unwrap();

        let snapshot = applied.snapshot;
        assert_eq!(snapshot.config().workdir, "/srv/app");
        assert!(snapshot.is_dir("/srv/app"));
        assert_eq!(snapshot.config().env["APP_HOME"], "/srv");
    }

    #[tokio::test]
    async fn test_copy_from_context_into_workdir() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let mut snapshot = Snapshot::empty();
        snapshot.mkdir_all("/app");
        snapshot.config_mut().workdir = "/app".into();

        let applied = executor
            .apply(
                snapshot,
                &Instruction::Copy {
                    from: None,
                    src: CopySources::Single("requirements.txt".into()),
                    dest: ".".into(),
                },
                site(0),
            )
            .await
            .unwrap();
        assert!(applied.snapshot.contains("/app/requirements.txt"));

        let applied = executor
            .apply(
                applied.snapshot,
                &Instruction::Copy {
                    from: None,
                    src: CopySources::Single("*.py".into()),
                    dest: "src/".into(),
                },
                site(1),
            )
            .await
            .unwrap();
        assert!(applied.snapshot.contains("/app/src/a.py"));
        assert!(applied.snapshot.contains("/app/src/b.py"));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let result = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Copy {
                    from: None,
                    src: CopySources::Single("missing.txt".into()),
                    dest: "/".into(),
                },
                site(3),
            )
            .await;

        match result {
            Err(BuildError::SourceNotFound {
                stage, index, path, ..
            }) => {
                assert_eq!(stage, "runtime");
                assert_eq!(index, 3);
                assert_eq!(path, "missing.txt");
            }
            other => panic!("Expected SourceNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_sources_need_directory() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let result = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Copy {
                    from: None,
                    src: CopySources::Multiple(vec!["a.py".into(), "b.py".into()]),
                    dest: "/app".into(),
                },
                site(0),
            )
            .await;
        assert!(matches!(result, Err(BuildError::InvalidInstruction { .. })));
    }

    #[tokio::test]
    async fn test_copy_from_sealed_stage() {
        let (_dir, context) = context();
        let mut stages = store(&["builder", "runtime"]);

        stages.begin("builder").unwrap();
        let mut built = Snapshot::empty();
        built.put("/libs/flask/__init__.py", Entry::file("# flask", 0o644));
        built.put("/libs/jinja2/__init__.py", Entry::file("# jinja", 0o644));
        stages.seal("builder", built).unwrap();

        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let applied = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Copy {
                    from: Some("builder".into()),
                    src: CopySources::Single("/libs".into()),
                    dest: "/libs".into(),
                },
                site(0),
            )
            .await
            .unwrap();
        assert!(applied.snapshot.contains("/libs/flask/__init__.py"));
        assert!(applied.snapshot.contains("/libs/jinja2/__init__.py"));

        let applied = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Copy {
                    from: Some("builder".into()),
                    src: CopySources::Single("/libs/*/__init__.py".into()),
                    dest: "/inits/".into(),
                },
                site(1),
            )
            .await
            .unwrap();
        assert!(applied.snapshot.contains("/inits/__init__.py"));
    }

    #[tokio::test]
    async fn test_copy_from_unsealed_stage() {
        let (_dir, context) = context();
        let mut stages = store(&["builder", "runtime"]);
        stages.begin("builder").unwrap();

        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let result = executor
            .apply(
                Snapshot::empty(),
                &Instruction::Copy {
                    from: Some("builder".into()),
                    src: CopySources::Single("/libs".into()),
                    dest: "/libs".into(),
                },
                site(0),
            )
            .await;
        assert!(matches!(result, Err(BuildError::StageNotSealed { .. })));
    }

    #[tokio::test]
    async fn test_metadata_instructions() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        let mut snapshot = Snapshot::empty();
        for (i, instruction) in [
            Instruction::Env {
                key: "TEAM".into(),
                value: "web".into(),
            },
            Instruction::Expose { port: 8080 },
            Instruction::Expose { port: 8000 },
            Instruction::Cmd {
                args: vec!["run-server".into(), "0.0.0.0:8000".into()],
            },
            Instruction::Label {
                key: "maintainer".into(),
                value: "${TEAM} team".into(),
            },
        ]
        .iter()
        .enumerate()
        {
            snapshot = executor.apply(snapshot, instruction, site(i)).await.unwrap().snapshot;
        }

        assert_eq!(snapshot.config().exposed_port, Some(8000));
        assert_eq!(snapshot.config().cmd, vec!["run-server", "0.0.0.0:8000"]);
        assert_eq!(snapshot.config().labels["maintainer"], "web team");
    }

    #[tokio::test]
    async fn test_run_records_command() {
        let (_dir, context) = context();
        let stages = store(&["runtime"]);
        let runner = DryRunRunner::new();
        let executor = InstructionExecutor::new(&context, &stages, &runner, "sh");

        executor
            .apply(
                Snapshot::empty(),
                &Instruction::Run {
                    command: "pip install -r requirements.txt".into(),
                },
                site(0),
            )
            .await
            .unwrap();

        assert_eq!(runner.commands(), vec!["pip install -r requirements.txt"]);
    }
}
