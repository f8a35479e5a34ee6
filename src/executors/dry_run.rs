// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Dry-run command runner
//!
//! Records `RUN` commands without executing them.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{CommandRunner, RunOutcome};
use crate::errors::BuildResult;
use crate::snapshot::Snapshot;

/// Runner that succeeds without touching the filesystem
#[derive(Debug, Default)]
pub struct DryRunRunner {
    commands: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn run(&self, _snapshot: &Snapshot, command: &str, _shell: &str) -> BuildResult<RunOutcome> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        Ok(RunOutcome::success(String::new(), Vec::new(), Duration::ZERO))
    }

    async fn check_available(&self, _shell: &str) -> BuildResult<bool> {
        Ok(true)
    }

    fn cacheable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_without_changes() {
        let runner = DryRunRunner::new();
        let outcome = runner.run(&Snapshot::empty(), "make all", "sh").await.unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.changes.is_empty());
        assert_eq!(runner.commands(), vec!["make all"]);
        assert!(!runner.cacheable());
    }
}
