// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Stage descriptors
//!
//! A [`StageDescriptor`] is the checked, read-only form of a [`Stage`]: its
//! identity is fixed and its base reference has been classified as an
//! external image, `scratch`, or an earlier stage.

use std::collections::HashSet;
use std::fmt;

use super::{Instruction, Pipeline, Stage};
use crate::errors::{BuildError, BuildResult};

/// Base image reference that yields an empty root filesystem
pub const SCRATCH: &str = "scratch";

/// What a stage starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    /// External image reference
    Image(String),
    /// A stage declared earlier, by its identity
    Stage(String),
    /// Empty filesystem
    Scratch,
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(image) => write!(f, "{}", image),
            Self::Stage(stage) => write!(f, "stage {}", stage),
            Self::Scratch => write!(f, "{}", SCRATCH),
        }
    }
}

/// Checked, immutable description of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    name: String,
    index: usize,
    base: BaseRef,
    instructions: Vec<Instruction>,
}

impl StageDescriptor {
    /// Describe `stage` at position `index`
    ///
    /// `declared` holds the descriptors of every earlier stage and
    /// `identities` the names and indices of all stages in the build. A base
    /// matching an earlier stage becomes [`BaseRef::Stage`]; a base naming
    /// this stage or a later one fails with `UndefinedBase`; anything else is
    /// an external image.
    pub fn new(
        index: usize,
        stage: &Stage,
        declared: &[StageDescriptor],
        identities: &HashSet<String>,
    ) -> BuildResult<Self> {
        let name = stage.identity(index);
        let from = stage.from.trim();

        let base = if from == SCRATCH {
            BaseRef::Scratch
        } else if let Some(parent) = lookup(declared, from) {
            BaseRef::Stage(parent.name.clone())
        } else if identities.contains(from) {
            return Err(BuildError::UndefinedBase {
                stage: name,
                base: from.to_string(),
            });
        } else {
            BaseRef::Image(from.to_string())
        };

        Ok(Self {
            name,
            index,
            base,
            instructions: stage.steps.clone(),
        })
    }

    /// Describe every stage of a build file
    pub fn from_pipeline(pipeline: &Pipeline) -> BuildResult<Vec<Self>> {
        Self::from_stages(&pipeline.stages)
    }

    /// Describe a list of stages in declaration order
    pub fn from_stages(stages: &[Stage]) -> BuildResult<Vec<Self>> {
        if stages.is_empty() {
            return Err(BuildError::EmptyBuild);
        }

        let mut identities: HashSet<String> = (0..stages.len()).map(|i| i.to_string()).collect();
        for (index, stage) in stages.iter().enumerate() {
            if let Some(name) = &stage.name {
                // A name may not shadow another stage's index or name
                if name == SCRATCH
                    || (name != &index.to_string() && !identities.insert(name.clone()))
                {
                    return Err(BuildError::DuplicateStage { name: name.clone() });
                }
            }
        }

        let mut declared: Vec<Self> = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            let descriptor = Self::new(index, stage, &declared, &identities)?;
            declared.push(descriptor);
        }

        Ok(declared)
    }

    /// Stage identity (its name, or its index when unnamed)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in declaration order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn base(&self) -> &BaseRef {
        &self.base
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Whether `reference` names this stage
    pub fn answers_to(&self, reference: &str) -> bool {
        self.name == reference || self.index.to_string() == reference
    }

    /// `(instruction index, stage)` for every `COPY --from` in this stage
    pub fn copy_references(&self) -> Vec<(usize, &str)> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(i, instr)| instr.copy_source_stage().map(|s| (i, s)))
            .collect()
    }
}

/// Find the descriptor a reference names
pub fn lookup<'a>(descriptors: &'a [StageDescriptor], reference: &str) -> Option<&'a StageDescriptor> {
    descriptors.iter().find(|d| d.answers_to(reference))
}
