// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Filesystem-based cache implementation
//!
//! Stores cached layers as JSON files in a cache directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Cache, CacheStats, CachedLayer};
use crate::errors::BuildError;

/// Filesystem-based cache
pub struct FilesystemCache {
    /// Cache directory
    cache_dir: PathBuf,
}

impl FilesystemCache {
    /// Create a new filesystem cache
    pub fn new(cache_dir: PathBuf) -> Result<Self, BuildError> {
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir).map_err(|e| BuildError::CacheError {
                message: format!("Failed to create cache directory: {}", e),
            })?;
        }

        Ok(Self { cache_dir })
    }

    /// Create cache with default directory under `base_dir`
    pub fn default_cache(base_dir: &Path) -> Result<Self, BuildError> {
        Self::new(base_dir.join(".buildflow").join("cache"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get path for a cache entry
    fn cache_path(&self, key: &str) -> PathBuf {
        // First 2 chars as directory to keep directories small
        let (prefix, rest) = key.split_at(2.min(key.len()));
        self.cache_dir.join(prefix).join(format!("{}.json", rest))
    }

    /// List all cached layers
    async fn list_entries(&self) -> Result<Vec<CachedLayer>, BuildError> {
        let mut entries = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(entries);
        }

        for prefix_dir in std::fs::read_dir(&self.cache_dir).map_err(|e| BuildError::CacheError {
            message: format!("Failed to read cache directory: {}", e),
        })? {
            let prefix_dir = prefix_dir
                .map_err(|e| BuildError::CacheError {
                    message: format!("Failed to read cache entry: {}", e),
                })?
                .path();

            if !prefix_dir.is_dir() {
                continue;
            }

            for entry_file in std::fs::read_dir(&prefix_dir).map_err(|e| BuildError::CacheError {
                message: format!("Failed to read cache subdirectory: {}", e),
            })? {
                let entry_file = entry_file
                    .map_err(|e| BuildError::CacheError {
                        message: format!("Failed to read cache file: {}", e),
                    })?
                    .path();

                if entry_file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                // Unreadable entries are skipped; get() will drop them
                if let Ok(content) = tokio::fs::read_to_string(&entry_file).await {
                    if let Ok(entry) = serde_json::from_str::<CachedLayer>(&content) {
                        entries.push(entry);
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64, BuildError> {
        let mut size = 0;

        if path.is_file() {
            return Ok(path.metadata().map(|m| m.len()).unwrap_or(0));
        }

        for entry in std::fs::read_dir(path).map_err(|e| BuildError::CacheError {
            message: format!("Failed to read directory: {}", e),
        })? {
            let entry = entry.map_err(|e| BuildError::CacheError {
                message: format!("Failed to read entry: {}", e),
            })?;

            let path = entry.path();
            if path.is_dir() {
                size += Self::dir_size(&path)?;
            } else {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(size)
    }
}

#[async_trait]
impl Cache for FilesystemCache {
    async fn get(&self, key: &str) -> Result<Option<CachedLayer>, BuildError> {
        let path = self.cache_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BuildError::CacheError {
                message: format!("Failed to read cache entry: {}", e),
            })?;

        match serde_json::from_str::<CachedLayer>(&content) {
            Ok(layer) if layer.cache_key == key => Ok(Some(layer)),
            Ok(_) | Err(_) => {
                // Corrupt or mismatched entry, treat as a miss
                tracing::debug!(key, "Dropping stale cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    async fn store(&self, layer: &CachedLayer) -> Result<(), BuildError> {
        let path = self.cache_path(&layer.cache_key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::CacheError {
                    message: format!("Failed to create cache directory: {}", e),
                })?;
        }

        let json = serde_json::to_string(layer).map_err(|e| BuildError::CacheError {
            message: format!("Failed to serialize cache entry: {}", e),
        })?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| BuildError::CacheError {
                message: format!("Failed to write cache entry: {}", e),
            })?;

        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), BuildError> {
        let path = self.cache_path(key);

        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| BuildError::CacheError {
                    message: format!("Failed to remove cache entry: {}", e),
                })?;
        }

        Ok(())
    }

    async fn clear(&self) -> Result<(), BuildError> {
        if self.cache_dir.exists() {
            tokio::fs::remove_dir_all(&self.cache_dir)
                .await
                .map_err(|e| BuildError::CacheError {
                    message: format!("Failed to clear cache: {}", e),
                })?;

            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| BuildError::CacheError {
                    message: format!("Failed to recreate cache directory: {}", e),
                })?;
        }

        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, BuildError> {
        let entries = self.list_entries().await?;

        let mut stats = CacheStats {
            entries: entries.len(),
            oldest_entry: entries.iter().map(|e| e.timestamp).min(),
            newest_entry: entries.iter().map(|e| e.timestamp).max(),
            ..Default::default()
        };

        if self.cache_dir.exists() {
            stats.size_bytes = Self::dir_size(&self.cache_dir)?;
        }

        Ok(stats)
    }
}
