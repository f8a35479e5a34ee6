// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Graph command - visualize the stage graph

use miette::Result;
use std::path::PathBuf;

use super::{load_build, print_recovery, GraphFormat};
use crate::errors::BuildResult;
use crate::pipeline::{DagBuilder, Pipeline, StageDescriptor};

/// Run the graph command
pub async fn run(file: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let output = load_build(&file).and_then(|pipeline| render(&pipeline, format));

    match output {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            print_recovery(&e);
            Err(e.into())
        }
    }
}

fn render(pipeline: &Pipeline, format: GraphFormat) -> BuildResult<String> {
    let descriptors = StageDescriptor::from_pipeline(pipeline)?;
    let dag = DagBuilder::build(&descriptors, pipeline.options.reference_policy)?;

    Ok(match format {
        GraphFormat::Text => dag.to_text(&descriptors)?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    })
}
