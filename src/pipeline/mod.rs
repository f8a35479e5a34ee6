// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build definitions and execution
//!
//! This module defines the build file model (stages and instructions), the
//! Dockerfile-style descriptor parser, the stage graph, validation and the
//! executor that turns a build into an image.

mod dag;
mod definition;
mod descriptor;
pub mod dockerfile;
mod executor;
mod validation;

pub use dag::{DagBuilder, EdgeKind};
pub use definition::*;
pub use descriptor::{lookup, BaseRef, StageDescriptor, SCRATCH};
pub use executor::{BuildState, ExecutionOptions, PipelineExecutor, PipelineResult, StageReport};
pub use validation::{PipelineValidator, ValidationResult};
