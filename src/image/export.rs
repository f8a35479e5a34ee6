// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Image export
//!
//! Images are written either as a directory holding `rootfs/` and
//! `config.json`, or as a gzipped tarball with the same layout. Tarballs
//! are reproducible: entries are sorted and all timestamps and owners are
//! zeroed.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::Path;

use super::{ImageArtifact, ImageManifest};
use crate::errors::{BuildError, BuildResult};
use crate::snapshot::{read_dir_tree, write_tree, Entry, Snapshot};

/// Directory holding the root filesystem
pub const ROOTFS_DIR: &str = "rootfs";

/// Manifest file name
pub const CONFIG_FILE: &str = "config.json";

/// Write the image to `dir` as `rootfs/` plus `config.json`
///
/// An existing `rootfs/` in `dir` is replaced.
pub fn export_dir(artifact: &ImageArtifact, dir: &Path) -> BuildResult<()> {
    let rootfs = dir.join(ROOTFS_DIR);
    if rootfs.exists() {
        std::fs::remove_dir_all(&rootfs).map_err(|e| BuildError::FileWriteError {
            path: rootfs.clone(),
            error: e.to_string(),
        })?;
    }
    std::fs::create_dir_all(&rootfs).map_err(|e| BuildError::FileWriteError {
        path: rootfs.clone(),
        error: e.to_string(),
    })?;

    write_tree(artifact.rootfs().entries(), &rootfs)?;

    let config_path = dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(&artifact.manifest())?;
    std::fs::write(&config_path, json).map_err(|e| BuildError::FileWriteError {
        path: config_path,
        error: e.to_string(),
    })?;

    tracing::info!(path = %dir.display(), "Exported image directory");
    Ok(())
}

/// Write the image to `path` as a `.tar.gz`
pub fn export_tar(artifact: &ImageArtifact, path: &Path) -> BuildResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::FileWriteError {
            path: parent.to_path_buf(),
            error: e.to_string(),
        })?;
    }

    let file = std::fs::File::create(path).map_err(|e| BuildError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let tar_error = |e: std::io::Error| BuildError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    for (entry_path, entry) in artifact.rootfs().entries() {
        let relative = entry_path.trim_start_matches('/');
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(entry.mode());

        match entry {
            Entry::Dir { .. } => {
                let name = if relative.is_empty() {
                    format!("{}/", ROOTFS_DIR)
                } else {
                    format!("{}/{}/", ROOTFS_DIR, relative)
                };
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .map_err(tar_error)?;
            }
            Entry::File { contents, .. } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(contents.len() as u64);
                builder
                    .append_data(
                        &mut header,
                        format!("{}/{}", ROOTFS_DIR, relative),
                        contents.as_slice(),
                    )
                    .map_err(tar_error)?;
            }
        }
    }

    let json = serde_json::to_vec_pretty(&artifact.manifest())?;
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(json.len() as u64);
    builder
        .append_data(&mut header, CONFIG_FILE, json.as_slice())
        .map_err(tar_error)?;

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(tar_error)?;

    tracing::info!(path = %path.display(), "Exported image archive");
    Ok(())
}

/// Load an image directory written by [`export_dir`]
pub fn load_dir(dir: &Path) -> BuildResult<Snapshot> {
    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|e| BuildError::FileReadError {
        path: config_path.clone(),
        error: e.to_string(),
    })?;
    let manifest: ImageManifest = serde_json::from_str(&content)?;

    let entries = read_dir_tree(&dir.join(ROOTFS_DIR), &|_| false)?;
    Ok(Snapshot::from_parts(entries, manifest.config))
}
