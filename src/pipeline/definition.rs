// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build file definition structures
//!
//! Defines the schema for .buildflow.yaml files. TOML and JSON use the same
//! schema; Dockerfile-style descriptors are parsed into it by
//! [`super::dockerfile`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::BuildError;

/// Build definition from .buildflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Build file version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Build name
    #[serde(default = "default_name")]
    pub name: String,

    /// Build description
    #[serde(default)]
    pub description: Option<String>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Build options
    #[serde(default)]
    pub options: BuildOptions,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_name() -> String {
    "build".to_string()
}

impl Pipeline {
    /// Load a build file, picking the format from the file name
    ///
    /// `Dockerfile`, `Buildfile` and `*.dockerfile` are parsed as text
    /// descriptors; `.toml` and `.json` by extension; anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self, BuildError> {
        if !path.exists() {
            return Err(BuildError::BuildFileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BuildError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match BuildFileFormat::detect(&file_name) {
            BuildFileFormat::Dockerfile => {
                let mut pipeline = Self::from_dockerfile(&content)?;
                if let Some(parent) = path.parent().and_then(|p| p.file_name()) {
                    pipeline.name = parent.to_string_lossy().to_string();
                }
                Ok(pipeline)
            }
            BuildFileFormat::Toml => Self::from_toml(&content),
            BuildFileFormat::Json => Self::from_json(&content),
            BuildFileFormat::Yaml => Self::from_yaml(&content),
        }
    }

    /// Parse a build definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a build definition from TOML
    pub fn from_toml(content: &str) -> Result<Self, BuildError> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Parse a build definition from JSON
    pub fn from_json(content: &str) -> Result<Self, BuildError> {
        serde_json::from_str(content).map_err(Into::into)
    }

    /// Parse a Dockerfile-style text descriptor
    pub fn from_dockerfile(content: &str) -> Result<Self, BuildError> {
        let stages = super::dockerfile::parse(content)?;
        Ok(Self {
            version: default_version(),
            name: default_name(),
            description: None,
            stages,
            options: BuildOptions::default(),
            cache: CacheConfig::default(),
        })
    }

    /// Serialize the build definition to YAML
    pub fn to_yaml(&self) -> Result<String, BuildError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name or ordinal index
    pub fn get_stage(&self, reference: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .enumerate()
            .find(|(i, s)| s.identity(*i) == reference || i.to_string() == reference)
            .map(|(_, s)| s)
    }

    /// Stage identities in declaration order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, s)| s.identity(i))
            .collect()
    }
}

/// Build file formats understood by [`Pipeline::from_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFileFormat {
    Yaml,
    Toml,
    Json,
    Dockerfile,
}

impl BuildFileFormat {
    /// Guess the format from a file name
    pub fn detect(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        if lower == "dockerfile"
            || lower == "buildfile"
            || lower.starts_with("dockerfile.")
            || lower.ends_with(".dockerfile")
        {
            Self::Dockerfile
        } else if lower.ends_with(".toml") {
            Self::Toml
        } else if lower.ends_with(".json") {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// A single build stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name; unnamed stages are referred to by their index
    #[serde(default)]
    pub name: Option<String>,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Base: an external image reference, `scratch`, or an earlier stage
    pub from: String,

    /// Instructions in execution order
    #[serde(default)]
    pub steps: Vec<Instruction>,
}

impl Stage {
    /// The name this stage is known by at position `index`
    pub fn identity(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| index.to_string())
    }
}

/// A single instruction within a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Instruction {
    /// Set an environment variable
    Env { key: String, value: String },

    /// Change the working directory
    Workdir { path: String },

    /// Run a shell command
    Run { command: String },

    /// Copy from the build context or from another stage
    Copy {
        /// Source stage; `None` copies from the build context
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,

        /// Source path(s) or glob pattern(s)
        src: CopySources,

        /// Destination path
        dest: String,
    },

    /// Declare the exposed port
    Expose { port: u16 },

    /// Set the default command
    Cmd { args: Vec<String> },

    /// Add an image label
    Label { key: String, value: String },
}

impl Instruction {
    /// Instruction keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Env { .. } => "ENV",
            Self::Workdir { .. } => "WORKDIR",
            Self::Run { .. } => "RUN",
            Self::Copy { .. } => "COPY",
            Self::Expose { .. } => "EXPOSE",
            Self::Cmd { .. } => "CMD",
            Self::Label { .. } => "LABEL",
        }
    }

    /// Stage this instruction copies from, if any
    pub fn copy_source_stage(&self) -> Option<&str> {
        match self {
            Self::Copy { from: Some(stage), .. } => Some(stage),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env { key, value } => write!(f, "ENV {}={}", key, value),
            Self::Workdir { path } => write!(f, "WORKDIR {}", path),
            Self::Run { command } => write!(f, "RUN {}", command),
            Self::Copy { from, src, dest } => {
                write!(f, "COPY ")?;
                if let Some(stage) = from {
                    write!(f, "--from={} ", stage)?;
                }
                write!(f, "{} {}", src.patterns().join(" "), dest)
            }
            Self::Expose { port } => write!(f, "EXPOSE {}", port),
            Self::Cmd { args } => {
                let quoted: Vec<String> = args.iter().map(|a| format!("{:?}", a)).collect();
                write!(f, "CMD [{}]", quoted.join(", "))
            }
            Self::Label { key, value } => write!(f, "LABEL {}={:?}", key, value),
        }
    }
}

/// Copy source specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CopySources {
    /// Single path or glob pattern
    Single(String),

    /// Multiple paths or glob patterns
    Multiple(Vec<String>),
}

impl CopySources {
    /// Get source patterns
    pub fn patterns(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

impl From<&str> for CopySources {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

/// How `COPY --from` references are checked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Copies may only name stages declared earlier (default)
    #[default]
    DeclareBeforeUse,
    /// Copies may name any stage; order comes from the graph alone
    FullGraph,
}

impl fmt::Display for ReferencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclareBeforeUse => write!(f, "declare-before-use"),
            Self::FullGraph => write!(f, "full-graph"),
        }
    }
}

impl FromStr for ReferencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declare-before-use" => Ok(Self::DeclareBeforeUse),
            "full-graph" => Ok(Self::FullGraph),
            other => Err(format!(
                "unknown reference policy '{}' (expected declare-before-use or full-graph)",
                other
            )),
        }
    }
}

/// Build options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildOptions {
    /// Forward reference handling for `COPY --from`
    #[serde(default)]
    pub reference_policy: ReferencePolicy,

    /// Shell used for `RUN`
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            reference_policy: ReferencePolicy::default(),
            shell: default_shell(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable caching
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".buildflow/cache")
}
