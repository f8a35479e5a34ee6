// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Build context
//!
//! The local directory that `COPY` without `--from` reads from. It is passed
//! explicitly to every stage and never written to.

use glob::Pattern;
use std::path::{Path, PathBuf};

use super::{mode_of, normalize_path, read_dir_tree, Entry, Subtree, DEFAULT_FILE_MODE};
use crate::errors::BuildError;

/// Name of the optional exclude file at the context root
pub const IGNORE_FILE: &str = ".buildignore";

/// Read-only view of the local build context
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    excludes: Vec<Pattern>,
}

impl BuildContext {
    /// Open a build context rooted at `root`
    ///
    /// Patterns from `.buildignore` at the root are applied when present.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(BuildError::FileReadError {
                path: root,
                error: "build context is not a directory".to_string(),
            });
        }

        let mut context = Self {
            root,
            excludes: Vec::new(),
        };

        let ignore_file = context.root.join(IGNORE_FILE);
        if ignore_file.is_file() {
            let content =
                std::fs::read_to_string(&ignore_file).map_err(|e| BuildError::FileReadError {
                    path: ignore_file.clone(),
                    error: e.to_string(),
                })?;
            let patterns: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            context = context.with_excludes(&patterns)?;
        }

        Ok(context)
    }

    /// Add exclude patterns (relative to the context root)
    pub fn with_excludes(mut self, patterns: &[&str]) -> Result<Self, BuildError> {
        for pattern in patterns {
            let pattern = pattern.trim_start_matches("./").trim_matches('/');
            self.excludes.push(Pattern::new(pattern)?);
        }
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a context-relative path is excluded, directly or via a parent
    pub fn is_excluded(&self, relative: &str) -> bool {
        if relative.is_empty() || self.excludes.is_empty() {
            return false;
        }

        let mut prefix = String::new();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if self.excludes.iter().any(|p| p.matches(&prefix)) {
                return true;
            }
        }
        false
    }

    /// Resolve a source pattern into `(name, subtree)` pairs
    ///
    /// Plain paths yield at most one match; glob patterns may yield several.
    /// An empty result means nothing matched.
    pub fn resolve(&self, source: &str) -> Result<Vec<(String, Subtree)>, BuildError> {
        let relative = Self::relative(source);

        if !is_glob(&relative) {
            return Ok(self
                .read_subtree(&relative)?
                .map(|tree| vec![(name_of(&relative), tree)])
                .unwrap_or_default());
        }

        let full_pattern = self.root.join(&relative).to_string_lossy().to_string();
        let mut matches = Vec::new();

        for path in glob::glob(&full_pattern)?.filter_map(Result::ok) {
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if let Some(tree) = self.read_subtree(&rel)? {
                matches.push((name_of(&rel), tree));
            }
        }

        Ok(matches)
    }

    /// Read one context-relative path, or `None` if missing or excluded
    pub fn read_subtree(&self, relative: &str) -> Result<Option<Subtree>, BuildError> {
        if self.is_excluded(relative) {
            return Ok(None);
        }

        let path = self.root.join(relative);
        let Ok(metadata) = std::fs::metadata(&path) else {
            return Ok(None);
        };

        if metadata.is_dir() {
            let base = relative.trim_matches('/').to_string();
            let skip = |rel: &str| {
                let full = if base.is_empty() {
                    rel.to_string()
                } else {
                    format!("{}/{}", base, rel)
                };
                self.is_excluded(&full)
            };
            let mut entries = read_dir_tree(&path, &skip)?;
            entries.remove("/");
            let children = entries
                .into_iter()
                .map(|(p, e)| (p.trim_start_matches('/').to_string(), e))
                .collect();
            Ok(Some(Subtree::Dir(children)))
        } else {
            let contents = std::fs::read(&path).map_err(|e| BuildError::FileReadError {
                path: path.clone(),
                error: e.to_string(),
            })?;
            Ok(Some(Subtree::File(Entry::file(
                contents,
                mode_of(&metadata, DEFAULT_FILE_MODE),
            ))))
        }
    }

    fn relative(source: &str) -> String {
        normalize_path("/", source).trim_start_matches('/').to_string()
    }
}

fn is_glob(path: &str) -> bool {
    path.contains(|c| matches!(c, '*' | '?' | '['))
}

fn name_of(relative: &str) -> String {
    super::base_name(relative).to_string()
}
