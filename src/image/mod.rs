// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Image artifacts
//!
//! The product of a successful build: the sealed snapshot of the target
//! stage plus its runtime metadata.

mod export;

pub use export::{export_dir, export_tar, load_dir, CONFIG_FILE, ROOTFS_DIR};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::snapshot::{ImageConfig, SealedSnapshot};

/// Final image produced by a build
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    stage: String,
    rootfs: SealedSnapshot,
    digest: String,
}

impl ImageArtifact {
    /// Assemble the artifact from the sealed snapshot of `stage`
    pub fn assemble(stage: &str, rootfs: SealedSnapshot) -> Self {
        let digest = rootfs.digest();
        Self {
            stage: stage.to_string(),
            rootfs,
            digest,
        }
    }

    /// Stage the image was assembled from
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn rootfs(&self) -> &SealedSnapshot {
        &self.rootfs
    }

    pub fn config(&self) -> &ImageConfig {
        self.rootfs.config()
    }

    pub fn exposed_port(&self) -> Option<u16> {
        self.config().exposed_port
    }

    pub fn default_command(&self) -> &[String] {
        &self.config().cmd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.config().env
    }

    pub fn workdir(&self) -> &str {
        &self.config().workdir
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.config().labels
    }

    /// Content digest (`blake3:<hex>`)
    pub fn digest(&self) -> String {
        format!("blake3:{}", self.digest)
    }

    /// Serializable description of the image
    pub fn manifest(&self) -> ImageManifest {
        ImageManifest {
            stage: self.stage.clone(),
            digest: self.digest(),
            files: self.rootfs.file_count(),
            size_bytes: self.rootfs.total_size(),
            config: self.config().clone(),
        }
    }
}

/// Image description written as `config.json` next to the root filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub stage: String,
    pub digest: String,
    pub files: usize,
    pub size_bytes: u64,
    pub config: ImageConfig,
}
