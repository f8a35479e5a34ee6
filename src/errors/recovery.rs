// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from build failures.

use super::BuildError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for a build error, if one applies
    pub fn for_error(error: &BuildError) -> Option<Self> {
        match error {
            BuildError::CyclicDependency { stages } => Some(Self::fix_cyclic_dependency(stages)),
            BuildError::UnknownStage { stage, reference } => {
                Some(Self::declare_stage_first(stage, reference))
            }
            BuildError::UndefinedBase { stage, base } => Some(Self::declare_stage_first(stage, base)),
            BuildError::SourceNotFound { path, origin, .. } => {
                Some(Self::fix_missing_source(path, origin))
            }
            BuildError::BuildFileNotFound { .. } => Some(Self::create_build_file()),
            _ => None,
        }
    }

    /// Suggest fixing a cyclic dependency
    pub fn fix_cyclic_dependency(stages: &[String]) -> Self {
        Self {
            action: "Remove cyclic dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", stages.join(" → ")),
                "A stage can only copy from stages that finish before it starts".into(),
                "Move the shared files into a separate stage both can copy from".into(),
            ],
            commands: vec![
                "# Visualize your stages:".into(),
                "buildflow graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest moving a referenced stage above the stage that uses it
    pub fn declare_stage_first(stage: &str, reference: &str) -> Self {
        Self {
            action: format!("Declare '{}' before '{}'", reference, stage),
            steps: vec![
                format!("'{}' refers to '{}', which is not declared above it", stage, reference),
                "Move the referenced stage earlier in the build file".into(),
                "Or set options.reference_policy to full-graph to allow forward copies".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest creating a build file
    pub fn create_build_file() -> Self {
        Self {
            action: "Create a build file".into(),
            steps: vec![
                "No .buildflow.yaml found in current directory".into(),
                "Initialize one or pass an existing Dockerfile with --file".into(),
            ],
            commands: vec![
                "# Scaffold a multi-stage build:".into(),
                "buildflow init".into(),
                "".into(),
                "# Or build a Dockerfile:".into(),
                "buildflow build --file Dockerfile".into(),
            ],
        }
    }

    /// Suggest fixing a missing copy source
    pub fn fix_missing_source(path: &str, origin: &str) -> Self {
        Self {
            action: format!("Provide '{}' in {}", path, origin),
            steps: vec![
                format!("COPY expects '{}' to exist in {}", path, origin),
                "Check the path is not excluded by .buildignore".into(),
                "Paths in a source stage are resolved from its root".into(),
            ],
            commands: vec![
                "# List files in the build context:".into(),
                format!("ls -la {}", path.replace('*', "\\*")),
            ],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
