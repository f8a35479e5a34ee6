// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Shell command runner
//!
//! Materializes the snapshot into a scratch directory, runs the command
//! there with `<shell> -c`, and diffs the directory back into a delta.
//! The scratch root is exported as `$BUILD_ROOT`; relative paths resolve
//! against the stage workdir inside it.

use async_trait::async_trait;
use std::time::Instant;
use tokio::process::Command;

use super::{CommandRunner, RunOutcome};
use crate::errors::{BuildError, BuildResult};
use crate::snapshot::{read_dir_tree, write_tree, Snapshot};

/// Environment variable holding the host path of the stage root
pub const BUILD_ROOT_VAR: &str = "BUILD_ROOT";

/// Shell runner
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Start from an empty environment instead of the host's
    clean_env: bool,
}

impl ShellRunner {
    /// Create a new shell runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not inherit the host environment
    pub fn with_clean_env(mut self) -> Self {
        self.clean_env = true;
        self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, snapshot: &Snapshot, command: &str, shell: &str) -> BuildResult<RunOutcome> {
        let root = tempfile::Builder::new()
            .prefix("buildflow-run-")
            .tempdir()
            .map_err(|e| BuildError::RunnerFailed {
                runner: self.name().to_string(),
                error: format!("Failed to create scratch root: {}", e),
                help: None,
            })?;

        write_tree(snapshot.entries(), root.path())?;

        let workdir = root
            .path()
            .join(snapshot.config().workdir.trim_start_matches('/'));
        std::fs::create_dir_all(&workdir).map_err(|e| BuildError::FileWriteError {
            path: workdir.clone(),
            error: e.to_string(),
        })?;

        let start = Instant::now();

        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(&workdir);
        if self.clean_env {
            cmd.env_clear();
        }
        cmd.envs(&snapshot.config().env);
        cmd.env(BUILD_ROOT_VAR, root.path());

        let output = cmd.output().await.map_err(|e| BuildError::RunnerFailed {
            runner: self.name().to_string(),
            error: e.to_string(),
            help: Some(format!("Shell '{}' may not be available", shell)),
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Ok(RunOutcome {
                exit_code,
                stdout,
                stderr,
                changes: Vec::new(),
                duration,
            });
        }

        let after = read_dir_tree(root.path(), &|_| false)?;
        let changes = snapshot.changes_to(&after);
        tracing::debug!(changes = changes.len(), ?duration, "Command finished");

        Ok(RunOutcome {
            exit_code: 0,
            stdout,
            stderr,
            changes,
            duration,
        })
    }

    async fn check_available(&self, shell: &str) -> BuildResult<bool> {
        Ok(which::which(shell).is_ok())
    }

    fn fingerprint(&self) -> String {
        if self.clean_env {
            "shell:clean-env".to_string()
        } else {
            "shell".to_string()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::snapshot::{Change, Entry};

    #[tokio::test]
    async fn test_run_produces_delta() {
        let runner = ShellRunner::new();
        let mut snapshot = Snapshot::empty();
        snapshot.mkdir_all("/app");
        snapshot.put("/app/old.txt", Entry::file("old", 0o644));
        snapshot.config_mut().workdir = "/app".into();
        snapshot.config_mut().env.insert("GREETING".into(), "hello".into());

        let outcome = runner
            .run(
                &snapshot,
                "echo \"$GREETING\" > new.txt && rm old.txt && mkdir -p \"$BUILD_ROOT/libs\"",
                "sh",
            )
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.changes.contains(&Change::Remove {
            path: "/app/old.txt".into()
        }));

        let mut after = snapshot.clone();
        after.apply(&outcome.changes);
        match after.get("/app/new.txt") {
            Some(Entry::File { contents, .. }) => assert_eq!(contents, b"hello\n"),
            other => panic!("Expected file, got {:?}", other),
        }
        assert!(after.is_dir("/libs"));
        assert!(!after.contains("/app/old.txt"));
    }

    #[tokio::test]
    async fn test_noop_run_keeps_directory_modes() {
        let runner = ShellRunner::new();
        let mut snapshot = Snapshot::empty();
        snapshot.put("/tmp", Entry::Dir { mode: 0o1777 });
        snapshot.put("/secret", Entry::Dir { mode: 0o700 });
        snapshot.put("/secret/token", Entry::file("t", 0o600));

        let outcome = runner.run(&snapshot, "true", "sh").await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.changes, Vec::new());
    }

    #[test]
    fn test_fingerprint_tracks_environment() {
        let inherited = ShellRunner::new();
        let clean = ShellRunner::new().with_clean_env();
        assert_ne!(inherited.fingerprint(), clean.fingerprint());
    }

    #[tokio::test]
    async fn test_failing_command() {
        let runner = ShellRunner::new();
        let outcome = runner
            .run(&Snapshot::empty(), "echo boom >&2; exit 3", "sh")
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("boom"));
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let runner = ShellRunner::new();
        let result = runner
            .run(&Snapshot::empty(), "true", "definitely-not-a-shell")
            .await;
        assert!(matches!(result, Err(BuildError::RunnerFailed { .. })));
        assert!(!runner.check_available("definitely-not-a-shell").await.unwrap());
    }
}
