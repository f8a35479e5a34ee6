// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Layer cache
//!
//! Records the filesystem delta of each `RUN` so identical commands on
//! identical snapshots can be replayed instead of executed again.

mod filesystem;
mod hash;

pub use filesystem::FilesystemCache;
pub use hash::{hash_string, ContentHasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::errors::BuildError;
use crate::snapshot::Change;

/// Trait for cache implementations
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get the cached layer for a key
    async fn get(&self, key: &str) -> Result<Option<CachedLayer>, BuildError>;

    /// Store a layer under its own key
    async fn store(&self, layer: &CachedLayer) -> Result<(), BuildError>;

    /// Invalidate the layer for a key
    async fn invalidate(&self, key: &str) -> Result<(), BuildError>;

    /// Clear all cached layers
    async fn clear(&self) -> Result<(), BuildError>;

    /// Get cache statistics
    async fn stats(&self) -> Result<CacheStats, BuildError>;
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached layers
    pub entries: usize,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
}

impl CacheStats {
    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

/// A recorded `RUN` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedLayer {
    /// When the layer was cached
    pub timestamp: SystemTime,
    /// Stage that produced the layer
    pub stage_name: String,
    /// Cache key (parent digest, command and shell)
    pub cache_key: String,
    /// The command that ran
    pub command: String,
    /// Filesystem delta to replay
    pub changes: Vec<Change>,
    /// How long the original run took
    pub duration_ms: u64,
}
