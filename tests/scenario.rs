// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! End-to-end builds through the library API with a scripted runner

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use buildflow::cache::FilesystemCache;
use buildflow::executors::{CommandRunner, RunOutcome};
use buildflow::pipeline::{ExecutionOptions, PipelineExecutor, PipelineResult, StageDescriptor};
use buildflow::snapshot::{Change, Entry, Snapshot, StageState, StageStore};
use buildflow::{BuildContext, BuildError, BuildResult, Pipeline};

/// Runner that fakes a package manager
///
/// `pip install` writes a package under `/libs`; `false` fails.
#[derive(Default)]
struct ScriptedRunner {
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, snapshot: &Snapshot, command: &str, _shell: &str) -> BuildResult<RunOutcome> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("false") {
            return Ok(RunOutcome::failure(1, "error: command failed\n".into(), Duration::ZERO));
        }

        let mut changes = Vec::new();
        if command.contains("pip install -r") {
            assert!(
                snapshot.contains(&snapshot.resolve("requirements.txt")),
                "manifest must be copied before installing"
            );
            changes.push(Change::Upsert {
                path: "/libs".into(),
                entry: Entry::dir(),
            });
            changes.push(Change::Upsert {
                path: "/libs/flask/__init__.py".into(),
                entry: Entry::file("# flask", 0o644),
            });
        } else if command.contains("ensurepip") {
            changes.push(Change::Upsert {
                path: "/usr/local/bin/pip".into(),
                entry: Entry::file("#!/bin/sh", 0o755),
            });
        }

        Ok(RunOutcome::success(String::new(), changes, Duration::from_millis(1)))
    }

    async fn check_available(&self, _shell: &str) -> BuildResult<bool> {
        Ok(true)
    }
}

const PYTHON_BUILD: &str = r#"
name: web
stages:
  - name: base
    from: python:3.12-slim
    steps:
      - type: workdir
        path: /app
  - name: builder
    from: base
    steps:
      - type: run
        command: python -m ensurepip
      - type: copy
        src: requirements.txt
        dest: .
      - type: run
        command: pip install -r requirements.txt --target /libs
  - name: runtime
    from: base
    steps:
      - type: copy
        from: builder
        src: /libs
        dest: /libs
      - type: copy
        src: src/
        dest: .
      - type: expose
        port: 8000
      - type: cmd
        args: [run-server, "0.0.0.0:8000"]
"#;

fn python_context() -> (TempDir, BuildContext) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();
    std::fs::create_dir_all(dir.path().join("src/web")).unwrap();
    std::fs::write(dir.path().join("src/manage.py"), "print('manage')\n").unwrap();
    std::fs::write(dir.path().join("src/web/__init__.py"), "").unwrap();
    let context = BuildContext::new(dir.path()).unwrap();
    (dir, context)
}

async fn build(pipeline: &Pipeline, context: &BuildContext) -> (Arc<ScriptedRunner>, BuildResult<PipelineResult>) {
    let runner = Arc::new(ScriptedRunner::default());
    let mut executor = PipelineExecutor::new(runner.clone());
    let result = executor
        .execute(pipeline, context, &ExecutionOptions::default())
        .await;
    (runner, result)
}

#[tokio::test]
async fn python_runtime_image() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(PYTHON_BUILD).unwrap();

    let (runner, result) = build(&pipeline, &context).await;
    let result = result.unwrap();
    let artifact = &result.artifact;

    assert_eq!(
        runner.commands(),
        vec![
            "python -m ensurepip",
            "pip install -r requirements.txt --target /libs"
        ]
    );

    assert!(artifact.rootfs().is_dir("/libs"));
    assert!(artifact.rootfs().contains("/libs/flask/__init__.py"));
    assert!(artifact.rootfs().contains("/app/manage.py"));
    assert!(artifact.rootfs().contains("/app/web/__init__.py"));
    // Builder-only files stay out of the final image
    assert!(!artifact.rootfs().contains("/app/requirements.txt"));
    assert!(!artifact.rootfs().contains("/usr/local/bin/pip"));

    assert_eq!(artifact.exposed_port(), Some(8000));
    assert_eq!(artifact.default_command(), ["run-server", "0.0.0.0:8000"]);
    assert_eq!(artifact.workdir(), "/app");
}

#[tokio::test]
async fn every_stage_is_sealed_once() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(PYTHON_BUILD).unwrap();

    let (_runner, result) = build(&pipeline, &context).await;
    let transitions = result.unwrap().transitions;

    assert_eq!(
        transitions,
        vec![
            ("base".to_string(), StageState::Executing),
            ("base".to_string(), StageState::Sealed),
            ("builder".to_string(), StageState::Executing),
            ("builder".to_string(), StageState::Sealed),
            ("runtime".to_string(), StageState::Executing),
            ("runtime".to_string(), StageState::Sealed),
        ]
    );
}

#[tokio::test]
async fn identical_builds_are_identical() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(PYTHON_BUILD).unwrap();

    let (_, first) = build(&pipeline, &context).await;
    let (_, second) = build(&pipeline, &context).await;
    let (first, second) = (first.unwrap().artifact, second.unwrap().artifact);

    assert_eq!(first.env(), second.env());
    assert_eq!(first.default_command(), second.default_command());
    assert_eq!(first.digest(), second.digest());
}

#[tokio::test]
async fn failing_run_names_stage_and_index() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(
        r#"
stages:
  - name: builder
    from: python:3.12-slim
    steps:
      - type: env
        key: PIP_NO_CACHE_DIR
        value: "1"
      - type: run
        command: false && pip install flask
  - name: runtime
    from: builder
"#,
    )
    .unwrap();

    let (runner, result) = build(&pipeline, &context).await;

    match result {
        Err(BuildError::CommandExecution {
            stage,
            index,
            exit_code,
            instruction,
            ..
        }) => {
            assert_eq!(stage, "builder");
            assert_eq!(index, 1);
            assert_eq!(exit_code, 1);
            assert!(instruction.starts_with("RUN false"));
        }
        other => panic!("Expected CommandExecution, got {:?}", other.map(|r| r.artifact.digest())),
    }
    // The build stops at the first failure
    assert_eq!(runner.commands().len(), 1);
}

#[tokio::test]
async fn forward_copy_is_unknown_stage() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(
        r#"
stages:
  - name: runtime
    from: python:3.12-slim
    steps:
      - type: copy
        from: builder
        src: /libs
        dest: /libs
  - name: builder
    from: python:3.12-slim
    steps:
      - type: run
        command: pip install -r requirements.txt
"#,
    )
    .unwrap();

    let (runner, result) = build(&pipeline, &context).await;

    match result {
        Err(BuildError::UnknownStage { stage, reference }) => {
            assert_eq!(stage, "runtime");
            assert_eq!(reference, "builder");
        }
        other => panic!("Expected UnknownStage, got {:?}", other.map(|r| r.artifact.digest())),
    }
    assert!(runner.commands().is_empty());
}

#[tokio::test]
async fn forward_copy_under_full_graph_policy() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(
        r#"
options:
  reference_policy: full-graph
stages:
  - name: assets
    from: scratch
    steps:
      - type: copy
        from: builder
        src: /libs
        dest: /libs
  - name: builder
    from: python:3.12-slim
    steps:
      - type: copy
        src: requirements.txt
        dest: /build/
      - type: workdir
        path: /build
      - type: run
        command: pip install -r requirements.txt
"#,
    )
    .unwrap();

    let options = ExecutionOptions {
        target: Some("assets".into()),
        ..Default::default()
    };
    let mut executor = PipelineExecutor::new(Arc::new(ScriptedRunner::default()));
    let result = executor.execute(&pipeline, &context, &options).await.unwrap();

    let order: Vec<&str> = result.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(order, vec!["builder", "assets"]);
    assert!(result.artifact.rootfs().contains("/libs/flask/__init__.py"));
}

#[tokio::test]
async fn cycle_fails_before_any_run() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(
        r#"
options:
  reference_policy: full-graph
stages:
  - name: a
    from: scratch
    steps:
      - type: run
        command: pip install -r requirements.txt
      - type: copy
        from: b
        src: /out
        dest: /in
  - name: b
    from: scratch
    steps:
      - type: copy
        from: a
        src: /libs
        dest: /libs
"#,
    )
    .unwrap();

    let (runner, result) = build(&pipeline, &context).await;

    match result {
        Err(BuildError::CyclicDependency { stages }) => {
            assert_eq!(stages, vec!["a", "b", "a"]);
        }
        other => panic!("Expected CyclicDependency, got {:?}", other.map(|r| r.artifact.digest())),
    }
    assert!(runner.commands().is_empty());
}

#[test]
fn copy_from_unsealed_stage_is_rejected() {
    let pipeline = Pipeline::from_yaml(PYTHON_BUILD).unwrap();
    let descriptors = StageDescriptor::from_pipeline(&pipeline).unwrap();
    let mut store = StageStore::new(&descriptors);

    store.begin("builder").unwrap();

    match store.resolve("runtime", "builder", "/libs") {
        Err(BuildError::StageNotSealed { stage, reference }) => {
            assert_eq!(stage, "runtime");
            assert_eq!(reference, "builder");
        }
        other => panic!("Expected StageNotSealed, got {:?}", other),
    }
}

#[tokio::test]
async fn layer_cache_replays_runs() {
    let (dir, context) = python_context();
    let pipeline = Pipeline::from_yaml(PYTHON_BUILD).unwrap();
    let cache_dir = dir.path().join(".buildflow/cache");

    let first_runner = Arc::new(ScriptedRunner::default());
    let mut executor = PipelineExecutor::new(first_runner.clone())
        .with_cache(Box::new(FilesystemCache::new(cache_dir.clone()).unwrap()));
    let first = executor
        .execute(&pipeline, &context, &ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(first_runner.commands().len(), 2);
    assert_eq!(first.cache_hits(), 0);

    let second_runner = Arc::new(ScriptedRunner::default());
    let mut executor = PipelineExecutor::new(second_runner.clone())
        .with_cache(Box::new(FilesystemCache::new(cache_dir).unwrap()));
    let second = executor
        .execute(&pipeline, &context, &ExecutionOptions::default())
        .await
        .unwrap();

    assert!(second_runner.commands().is_empty());
    assert_eq!(second.cache_hits(), 2);
    assert_eq!(first.artifact.digest(), second.artifact.digest());
}

#[tokio::test]
async fn dockerfile_build() {
    let (_dir, context) = python_context();
    let pipeline = Pipeline::from_dockerfile(
        r#"
# syntax=docker/dockerfile:1
ARG PYTHON=3.12
FROM python:${PYTHON}-slim AS base
WORKDIR /app

FROM base AS builder
RUN python -m ensurepip
COPY requirements.txt .
RUN pip install -r requirements.txt --target /libs

FROM base AS runtime
COPY --from=builder /libs /libs
COPY src/ .
EXPOSE 8000
CMD ["run-server", "0.0.0.0:8000"]
"#,
    )
    .unwrap();

    let (_runner, result) = build(&pipeline, &context).await;
    let artifact = result.unwrap().artifact;

    assert_eq!(artifact.stage(), "runtime");
    assert!(artifact.rootfs().contains("/libs/flask/__init__.py"));
    assert!(artifact.rootfs().contains("/app/manage.py"));
    assert_eq!(artifact.exposed_port(), Some(8000));
    assert_eq!(artifact.default_command(), ["run-server", "0.0.0.0:8000"]);
}
