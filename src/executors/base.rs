// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Base image providers
//!
//! Supply the starting snapshot for stages based on an external image.

use std::path::{Path, PathBuf};

use crate::errors::{BuildError, BuildResult};
use crate::image::{self, ImageArtifact};
use crate::snapshot::Snapshot;

/// Source of root filesystems for external base images
pub trait BaseImageProvider: Send + Sync {
    /// Provider name for messages
    fn name(&self) -> &str;

    /// Load the snapshot for an image reference
    fn load(&self, reference: &str) -> BuildResult<Snapshot>;
}

/// Provider that treats every image as an empty filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchImages;

impl BaseImageProvider for ScratchImages {
    fn name(&self) -> &str {
        "scratch"
    }

    fn load(&self, reference: &str) -> BuildResult<Snapshot> {
        tracing::debug!(image = reference, "Using empty root filesystem");
        Ok(Snapshot::empty())
    }
}

/// Images stored as exported directories (`<ref>/rootfs` + `config.json`)
#[derive(Debug, Clone)]
pub struct ImageDirectory {
    root: PathBuf,
}

impl ImageDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data directory for stored images
    pub fn default_location() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "buildflow", "buildflow")
            .map(|dirs| dirs.data_dir().join("images"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory an image reference is stored under
    pub fn path_for(&self, reference: &str) -> PathBuf {
        let sanitized: String = reference
            .chars()
            .map(|c| match c {
                '/' | ':' | '@' | '\\' => '_',
                c => c,
            })
            .collect();
        self.root.join(sanitized)
    }

    /// Store a built image under `reference` so later builds can use it
    pub fn save(&self, reference: &str, artifact: &ImageArtifact) -> BuildResult<PathBuf> {
        let dir = self.path_for(reference);
        image::export_dir(artifact, &dir)?;
        Ok(dir)
    }
}

impl BaseImageProvider for ImageDirectory {
    fn name(&self) -> &str {
        "image-directory"
    }

    fn load(&self, reference: &str) -> BuildResult<Snapshot> {
        let dir = self.path_for(reference);
        if !dir.join(image::ROOTFS_DIR).is_dir() {
            return Err(BuildError::BaseImageNotFound {
                reference: reference.to_string(),
            });
        }

        tracing::debug!(image = reference, path = %dir.display(), "Loading base image");
        image::load_dir(&dir)
    }
}
