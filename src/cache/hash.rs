// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Content hashing for cache keys
//!
//! Uses BLAKE3 for fast, secure content hashing.

use blake3::Hasher;

/// Content hasher for generating cache keys
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a new content hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Cache key for running `command` with `shell` under a runner fingerprint
    ///
    /// Fields are length-prefixed so that moving bytes between them changes
    /// the key.
    pub fn layer_key(parent_digest: &str, command: &str, shell: &str, runner: &str) -> String {
        let mut hasher = Self::new();
        for field in [parent_digest, command, shell, runner] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.finalize()
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize and get the hash
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a quick hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_string() {
        let hash1 = hash_string("hello");
        let hash2 = hash_string("hello");
        let hash3 = hash_string("world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_hasher_consistent() {
        let mut hasher1 = ContentHasher::new();
        hasher1.update(b"test data");
        let hash1 = hasher1.finalize();

        let mut hasher2 = ContentHasher::new();
        hasher2.update(b"test data");
        let hash2 = hasher2.finalize();

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_layer_key() {
        let key = ContentHasher::layer_key("abc", "pip install flask", "sh", "shell");

        assert_eq!(key, ContentHasher::layer_key("abc", "pip install flask", "sh", "shell"));
        assert_ne!(key, ContentHasher::layer_key("abd", "pip install flask", "sh", "shell"));
        assert_ne!(key, ContentHasher::layer_key("abc", "pip install flask", "bash", "shell"));
        assert_ne!(
            ContentHasher::layer_key("ab", "c", "sh", "shell"),
            ContentHasher::layer_key("a", "bc", "sh", "shell")
        );
        assert_ne!(
            key,
            ContentHasher::layer_key("abc", "pip install flask", "sh", "shell:clean-env")
        );
    }
}
