// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build validation
//!
//! Validates a build definition before execution.

use std::collections::HashSet;

use crate::errors::BuildError;
use crate::pipeline::{BaseRef, DagBuilder, Instruction, Pipeline, StageDescriptor};
use crate::snapshot::BuildContext;

/// Build validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a build definition
    pub fn validate(pipeline: &Pipeline) -> Result<ValidationResult, BuildError> {
        let mut result = ValidationResult::new();

        // Check for empty stages
        if pipeline.stages.is_empty() {
            result.add_error("Build has no stages defined");
            return Ok(result);
        }

        // Check for duplicate stage names
        let mut seen_names = HashSet::new();
        for name in pipeline.stages.iter().filter_map(|s| s.name.as_ref()) {
            if !seen_names.insert(name) {
                result.add_error(&format!("Duplicate stage name: '{}'", name));
            }
        }

        // Validate each stage's instructions
        for (index, stage) in pipeline.stages.iter().enumerate() {
            let name = stage.identity(index);
            for (i, instruction) in stage.steps.iter().enumerate() {
                Self::validate_instruction(&name, i, instruction, &mut result);
            }

            let exposes = stage
                .steps
                .iter()
                .filter(|s| matches!(s, Instruction::Expose { .. }))
                .count();
            if exposes > 1 {
                result.add_warning(&format!(
                    "Stage '{}': {} EXPOSE instructions, only the last one is kept",
                    name, exposes
                ));
            }
        }

        if !result.is_valid() {
            return Ok(result);
        }

        // Validate stage references and graph structure
        let descriptors = match StageDescriptor::from_pipeline(pipeline) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                result.add_error(&e.to_string());
                return Ok(result);
            }
        };

        let dag = match DagBuilder::build(&descriptors, pipeline.options.reference_policy) {
            Ok(dag) => dag,
            Err(e) => {
                result.add_error(&e.to_string());
                return Ok(result);
            }
        };

        let Some(last) = descriptors.last() else {
            return Ok(result);
        };

        // Stages the final stage never reaches are only built with --target
        let required = dag.required_for(last.index());
        for descriptor in &descriptors {
            if !required.contains(&descriptor.index()) {
                result.add_warning(&format!(
                    "Stage '{}' is not used by the final stage '{}'",
                    descriptor.name(),
                    last.name()
                ));
            }
        }

        if !Self::has_default_command(&descriptors, last) {
            result.add_warning(&format!(
                "Final stage '{}' has no CMD; the image will have no default command",
                last.name()
            ));
        }

        Ok(result)
    }

    /// Validate a single instruction
    fn validate_instruction(
        stage: &str,
        index: usize,
        instruction: &Instruction,
        result: &mut ValidationResult,
    ) {
        let problem = match instruction {
            Instruction::Run { command } if command.trim().is_empty() => Some("RUN command is empty"),
            Instruction::Workdir { path } if path.trim().is_empty() => Some("WORKDIR path is empty"),
            Instruction::Env { key, .. } if key.trim().is_empty() => Some("ENV key is empty"),
            Instruction::Label { key, .. } if key.trim().is_empty() => Some("LABEL key is empty"),
            Instruction::Expose { port: 0 } => Some("EXPOSE port must be between 1 and 65535"),
            Instruction::Cmd { args } if args.is_empty() => Some("CMD has no arguments"),
            Instruction::Copy { src, dest, .. } => {
                if src.patterns().is_empty() || src.patterns().iter().any(|p| p.trim().is_empty()) {
                    Some("COPY source is empty")
                } else if dest.trim().is_empty() {
                    Some("COPY destination is empty")
                } else {
                    None
                }
            }
            _ => None,
        };

        if let Some(problem) = problem {
            result.add_error(&format!(
                "Stage '{}' instruction #{} ({}): {}",
                stage,
                index,
                instruction.keyword(),
                problem
            ));
        }
    }

    /// Whether `stage` or a stage it is based on sets a default command
    fn has_default_command(descriptors: &[StageDescriptor], stage: &StageDescriptor) -> bool {
        let mut current = Some(stage);
        while let Some(descriptor) = current {
            if descriptor
                .instructions()
                .iter()
                .any(|i| matches!(i, Instruction::Cmd { .. }))
            {
                return true;
            }
            current = match descriptor.base() {
                BaseRef::Stage(parent) => descriptors.iter().find(|d| d.name() == parent),
                // External images may bring their own command
                BaseRef::Image(_) => return true,
                BaseRef::Scratch => None,
            };
        }
        false
    }

    /// Check that build context sources exist (runtime validation)
    ///
    /// Sources containing variables are skipped since they depend on the
    /// stage environment.
    pub fn validate_sources(
        pipeline: &Pipeline,
        context: &BuildContext,
    ) -> Result<Vec<String>, BuildError> {
        let mut missing = Vec::new();

        for (index, stage) in pipeline.stages.iter().enumerate() {
            for instruction in &stage.steps {
                let Instruction::Copy { from: None, src, .. } = instruction else {
                    continue;
                };

                for pattern in src.patterns() {
                    if pattern.contains('$') {
                        continue;
                    }
                    if context.resolve(pattern)?.is_empty() {
                        missing.push(format!(
                            "Stage '{}': Source not found in build context: {}",
                            stage.identity(index),
                            pattern
                        ));
                    }
                }
            }
        }

        Ok(missing)
    }
}

/// Result of build validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
