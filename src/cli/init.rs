// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Init command - scaffold a multi-stage build

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::DEFAULT_BUILD_FILE;
use crate::snapshot::IGNORE_FILE;

/// Run the init command
pub async fn run(name: Option<String>, force: bool, verbose: bool) -> Result<()> {
    let image_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "web-app".to_string())
    });

    println!("{}", "Initializing buildflow project...".bold());
    println!();

    if Path::new(DEFAULT_BUILD_FILE).exists() && !force {
        return Err(miette::miette!(
            "{} already exists. Use --force to overwrite.",
            DEFAULT_BUILD_FILE
        ));
    }

    let build_content = generate_template(&image_name);
    std::fs::write(DEFAULT_BUILD_FILE, &build_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_BUILD_FILE, e))?;
    println!("  {} Created {}", "✓".green(), DEFAULT_BUILD_FILE);

    // Sample sources are only written when missing
    for (path, content) in sample_files() {
        let path = Path::new(path);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                miette::miette!("Failed to create directory '{}': {}", parent.display(), e)
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| miette::miette!("Failed to write {}: {}", path.display(), e))?;
        println!("  {} Created {}", "✓".green(), path.display());
    }

    println!();
    println!("{}", "Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. List your dependencies in {}", "requirements.txt".cyan());
    println!("  2. Edit {} to adjust the stages", DEFAULT_BUILD_FILE.cyan());
    println!("  3. Run {} to build the image", "buildflow build -o image".cyan());
    println!();

    if verbose {
        println!("{}", "Generated build file:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", build_content.dimmed());
    }

    Ok(())
}

fn generate_template(name: &str) -> String {
    format!(
        r#"# buildflow build file
#
# base     shared runtime settings
# builder  installs dependencies into /libs
# runtime  copies /libs and the sources into the final image

version: "1"
name: "{name}"

options:
  reference_policy: declare-before-use
  shell: sh

stages:
  - name: base
    from: python:3.12-slim
    steps:
      - type: env
        key: PYTHONPATH
        value: /libs
      - type: workdir
        path: /app

  - name: builder
    from: base
    steps:
      - type: copy
        src: requirements.txt
        dest: .
      # RUN sees the stage root as $BUILD_ROOT
      - type: run
        command: pip install --no-cache-dir --target "$BUILD_ROOT/libs" -r requirements.txt

  - name: runtime
    from: base
    steps:
      - type: copy
        from: builder
        src: /libs
        dest: /libs
      - type: copy
        src: src/
        dest: ./src/
      - type: expose
        port: 8000
      - type: cmd
        args: ["run-server", "0.0.0.0:8000"]

cache:
  enabled: true
  directory: .buildflow/cache
"#
    )
}

fn sample_files() -> [(&'static str, &'static str); 3] {
    [
        ("requirements.txt", "flask>=3.0\n"),
        (
            "src/app.py",
            r#"from flask import Flask

app = Flask(__name__)


@app.get("/")
def index():
    return {"status": "ok"}
"#,
        ),
        (IGNORE_FILE, "# Excluded from the build context\n__pycache__\n*.pyc\n.git\n"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineValidator};

    #[test]
    fn test_template_is_valid() {
        let pipeline = Pipeline::from_yaml(&generate_template("demo")).unwrap();
        assert_eq!(pipeline.name, "demo");
        assert_eq!(pipeline.stage_names(), vec!["base", "builder", "runtime"]);

        let result = PipelineValidator::validate(&pipeline).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings(), "{:?}", result.warnings);
    }
}
