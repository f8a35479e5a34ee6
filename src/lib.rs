// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! # buildflow - Declarative Multi-Stage Image Builder
//!
//! `buildflow` builds container-style images from multi-stage build files.
//!
//! ## Features
//!
//! - **Stage graph** - Stages are ordered by their `FROM` and `COPY --from` references
//! - **Sealed stages** - A stage can only be copied from once it has finished
//! - **Layer cache** - `RUN` results are replayed when nothing they depend on changed
//! - **Dockerfile support** - Build files can be YAML, TOML, JSON or Dockerfile text
//! - **Reproducible output** - Images export to a directory or a deterministic `.tar.gz`
//!
//! ## Quick Start
//!
//! ```bash
//! # Scaffold a multi-stage build
//! buildflow init
//!
//! # Check it
//! buildflow validate
//!
//! # Build and export the image
//! buildflow build --output image
//! ```

pub mod cache;
pub mod cli;
pub mod errors;
pub mod executors;
pub mod image;
pub mod pipeline;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use errors::{BuildError, BuildResult};
pub use image::ImageArtifact;
pub use pipeline::{Instruction, Pipeline, PipelineExecutor, Stage, StageDescriptor};
pub use snapshot::{BuildContext, Snapshot, StageState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
