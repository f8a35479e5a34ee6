// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Error types
//!
//! Structural errors (graph shape, stage references) are raised before any
//! stage executes. Execution errors carry the stage name, the instruction
//! index and the instruction text so a failed build points at the exact step.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for buildflow operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Main error type for buildflow
#[derive(Error, Debug, Diagnostic)]
pub enum BuildError {
    // ─────────────────────────────────────────────────────────────────────────
    // Structural Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' is based on '{base}', which is not declared before it")]
    #[diagnostic(
        code(buildflow::undefined_base),
        help("Declare stage '{base}' above '{stage}', or use an external image reference")
    )]
    UndefinedBase { stage: String, base: String },

    #[error("Stage '{stage}' references unknown stage '{reference}'")]
    #[diagnostic(
        code(buildflow::unknown_stage),
        help("Stages must be declared before they are copied from (reference_policy: declare-before-use)")
    )]
    UnknownStage { stage: String, reference: String },

    #[error("Stage '{reference}' is not sealed yet (requested by '{stage}')")]
    #[diagnostic(code(buildflow::stage_not_sealed))]
    StageNotSealed { stage: String, reference: String },

    #[error("Cyclic dependency between stages: {}", .stages.join(" → "))]
    #[diagnostic(
        code(buildflow::cyclic_dependency),
        help("Review COPY --from and FROM references to remove the cycle")
    )]
    CyclicDependency { stages: Vec<String> },

    #[error("Duplicate stage name: '{name}'")]
    #[diagnostic(code(buildflow::duplicate_stage))]
    DuplicateStage { name: String },

    #[error("Build file defines no stages")]
    #[diagnostic(
        code(buildflow::empty_build),
        help("Add at least one stage, or run 'buildflow init' to scaffold a build file")
    )]
    EmptyBuild,

    #[error("Target stage '{target}' not found")]
    #[diagnostic(code(buildflow::unknown_target))]
    UnknownTarget { target: String },

    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    #[diagnostic(code(buildflow::invalid_transition))]
    InvalidTransition {
        stage: String,
        from: String,
        to: String,
    },

    #[error("Snapshot of stage '{stage}' was already released")]
    #[diagnostic(code(buildflow::stage_released))]
    StageReleased { stage: String },

    #[error("This executor already ran a build")]
    #[diagnostic(
        code(buildflow::executor_reused),
        help("Create a new PipelineExecutor for every build")
    )]
    ExecutorReused,

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' instruction #{index} ({instruction}) failed with exit code {exit_code}")]
    #[diagnostic(code(buildflow::command_failed))]
    CommandExecution {
        stage: String,
        index: usize,
        instruction: String,
        exit_code: i32,
        stderr: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage '{stage}' instruction #{index} ({instruction}): source '{path}' not found in {origin}")]
    #[diagnostic(code(buildflow::source_not_found))]
    SourceNotFound {
        stage: String,
        index: usize,
        instruction: String,
        path: String,
        origin: String,
    },

    #[error("Stage '{stage}' instruction #{index} is invalid: {reason}")]
    #[diagnostic(code(buildflow::invalid_instruction))]
    InvalidInstruction {
        stage: String,
        index: usize,
        reason: String,
    },

    #[error("Command runner '{runner}' could not start: {error}")]
    #[diagnostic(code(buildflow::runner_failed))]
    RunnerFailed {
        runner: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Base image '{reference}' not found")]
    #[diagnostic(
        code(buildflow::base_image_not_found),
        help("Export an image into the image directory, or build without --images to use empty bases")
    )]
    BaseImageNotFound { reference: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Build File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Build file not found: {path}")]
    #[diagnostic(
        code(buildflow::build_file_not_found),
        help("Create a build file with 'buildflow init' or pass one with --file")
    )]
    BuildFileNotFound { path: PathBuf },

    #[error("Build file is invalid: {count} error(s) found")]
    #[diagnostic(
        code(buildflow::invalid_build),
        help("Run 'buildflow validate' to list every problem")
    )]
    InvalidBuild { count: usize },

    #[error("Line {line}: {message}")]
    #[diagnostic(code(buildflow::parse_error))]
    Parse {
        line: usize,
        message: String,
        #[help]
        hint: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(buildflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(buildflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Cache Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cache error: {message}")]
    #[diagnostic(code(buildflow::cache_error))]
    CacheError { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(buildflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(buildflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(buildflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(buildflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(buildflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for BuildError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for BuildError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for BuildError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl BuildError {
    /// Whether the error was raised while checking the stage graph, before
    /// any instruction ran
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UndefinedBase { .. }
                | Self::UnknownStage { .. }
                | Self::StageNotSealed { .. }
                | Self::CyclicDependency { .. }
                | Self::DuplicateStage { .. }
                | Self::EmptyBuild
                | Self::UnknownTarget { .. }
        )
    }

    /// Stage the error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::UndefinedBase { stage, .. }
            | Self::UnknownStage { stage, .. }
            | Self::StageNotSealed { stage, .. }
            | Self::InvalidTransition { stage, .. }
            | Self::StageReleased { stage }
            | Self::CommandExecution { stage, .. }
            | Self::SourceNotFound { stage, .. }
            | Self::InvalidInstruction { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Create a command failure with a hint derived from the command output
    pub fn command_failed(
        stage: &str,
        index: usize,
        instruction: String,
        exit_code: i32,
        stderr: String,
    ) -> Self {
        let help = Self::hint_for_command_error(exit_code, &stderr);
        Self::CommandExecution {
            stage: stage.to_string(),
            index,
            instruction,
            exit_code,
            stderr,
            help,
        }
    }

    fn hint_for_command_error(exit_code: i32, stderr: &str) -> Option<String> {
        if exit_code == 127 || stderr.contains("command not found") {
            Some("The command is not installed in the stage. Install it in an earlier RUN or pick a base image that ships it.".into())
        } else if stderr.contains("Permission denied") {
            Some("A file the command needs is not executable or writable. Check modes of copied files.".into())
        } else if stderr.contains("No such file or directory") {
            Some("A path used by the command does not exist. Relative paths resolve against the stage WORKDIR.".into())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let err = BuildError::CyclicDependency {
            stages: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.is_structural());
        assert_eq!(err.to_string(), "Cyclic dependency between stages: a → b → a");

        let err = BuildError::command_failed("builder", 2, "RUN false".into(), 1, String::new());
        assert!(!err.is_structural());
        assert_eq!(err.stage(), Some("builder"));
    }

    #[test]
    fn test_command_not_found_hint() {
        let err = BuildError::command_failed("b", 0, "RUN pipx".into(), 127, "sh: pipx: not found".into());
        match err {
            BuildError::CommandExecution { help, .. } => assert!(help.is_some()),
            _ => panic!("Expected CommandExecution"),
        }
    }
}
