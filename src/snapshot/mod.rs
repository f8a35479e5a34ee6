// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Filesystem snapshots
//!
//! A [`Snapshot`] is the state a stage accumulates while its instructions
//! run: a tree of files and directories keyed by normalized absolute POSIX
//! path, plus the image configuration (env, workdir, port, command, labels).
//! Once a stage finishes, its snapshot is sealed into a [`SealedSnapshot`],
//! which only hands out shared references.

mod context;
mod store;

pub use context::{BuildContext, IGNORE_FILE};
pub use store::{StageState, StageStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::errors::BuildError;

/// Default mode for directories created implicitly
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default mode for files when the host gives no permission bits
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// A single filesystem entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    /// Regular file
    File { contents: Vec<u8>, mode: u32 },
    /// Directory
    Dir { mode: u32 },
}

impl Entry {
    /// Create a regular file entry
    pub fn file(contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self::File {
            contents: contents.into(),
            mode,
        }
    }

    /// Create a directory entry with the default mode
    pub fn dir() -> Self {
        Self::Dir {
            mode: DEFAULT_DIR_MODE,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir { .. })
    }

    /// Size in bytes (zero for directories)
    pub fn size(&self) -> u64 {
        match self {
            Self::File { contents, .. } => contents.len() as u64,
            Self::Dir { .. } => 0,
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Self::File { mode, .. } | Self::Dir { mode } => *mode,
        }
    }
}

/// A single change produced by running a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Change {
    /// Create or replace an entry
    Upsert { path: String, entry: Entry },
    /// Remove an entry and everything below it
    Remove { path: String },
}

/// A piece of a filesystem taken from a build context or a sealed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subtree {
    /// A single file
    File(Entry),
    /// Directory contents keyed by path relative to the directory
    Dir(BTreeMap<String, Entry>),
}

impl Subtree {
    /// Number of files and directories in the subtree
    pub fn len(&self) -> usize {
        match self {
            Self::File(_) => 1,
            Self::Dir(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Dir(entries) if entries.is_empty())
    }
}

/// Runtime configuration accumulated alongside the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Current working directory
    #[serde(default = "root_dir")]
    pub workdir: String,

    /// Declared exposed port
    #[serde(default)]
    pub exposed_port: Option<u16>,

    /// Default command
    #[serde(default)]
    pub cmd: Vec<String>,

    /// Image labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn root_dir() -> String {
    "/".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            workdir: root_dir(),
            exposed_port: None,
            cmd: Vec::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Mutable filesystem state of a stage under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
    config: ImageConfig,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// An empty root filesystem
    pub fn empty() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Entry::dir());
        Self {
            entries,
            config: ImageConfig::default(),
        }
    }

    /// Build a snapshot from existing entries and config
    pub fn from_parts(entries: BTreeMap<String, Entry>, config: ImageConfig) -> Self {
        let mut snapshot = Self {
            entries: BTreeMap::new(),
            config,
        };
        snapshot.entries.insert("/".to_string(), Entry::dir());
        for (path, entry) in entries {
            snapshot.put(&path, entry);
        }
        snapshot
    }

    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ImageConfig {
        &mut self.config
    }

    /// Look up an entry by path (relative paths resolve against the workdir)
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(&self.resolve(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.get(path).map(Entry::is_dir).unwrap_or(false)
    }

    /// Resolve a path against the current workdir
    pub fn resolve(&self, path: &str) -> String {
        normalize_path(&self.config.workdir, path)
    }

    /// Create a directory and all missing parents
    pub fn mkdir_all(&mut self, path: &str) {
        let path = self.resolve(path);
        self.ensure_parents(&path);
        match self.entries.get(&path) {
            Some(entry) if entry.is_dir() => {}
            _ => {
                self.entries.insert(path, Entry::dir());
            }
        }
    }

    /// Insert an entry, creating parent directories as needed
    ///
    /// Replacing a directory with a file drops everything below it.
    pub fn put(&mut self, path: &str, entry: Entry) {
        let path = self.resolve(path);
        if path == "/" {
            if entry.is_dir() {
                self.entries.insert(path, entry);
            }
            return;
        }

        self.ensure_parents(&path);

        if !entry.is_dir() {
            self.remove_descendants(&path);
        }
        self.entries.insert(path, entry);
    }

    /// Remove an entry and all of its descendants
    pub fn remove(&mut self, path: &str) {
        let path = self.resolve(path);
        if path == "/" {
            self.remove_descendants("/");
            return;
        }
        self.entries.remove(&path);
        self.remove_descendants(&path);
    }

    /// Apply a delta produced by a command
    pub fn apply(&mut self, changes: &[Change]) {
        for change in changes {
            match change {
                Change::Upsert { path, entry } => self.put(path, entry.clone()),
                Change::Remove { path } => self.remove(path),
            }
        }
    }

    /// Extract the subtree at `path` (relative paths resolve from the root)
    pub fn subtree(&self, path: &str) -> Option<Subtree> {
        let path = normalize_path("/", path);
        match self.entries.get(&path)? {
            Entry::Dir { .. } => {
                let prefix = dir_prefix(&path);
                let children = self
                    .entries
                    .range(prefix.clone()..)
                    .take_while(|(p, _)| p.starts_with(&prefix))
                    .map(|(p, e)| (p[prefix.len()..].to_string(), e.clone()))
                    .collect();
                Some(Subtree::Dir(children))
            }
            file => Some(Subtree::File(file.clone())),
        }
    }

    /// Place a subtree at `dest`
    ///
    /// Files land at `dest` itself unless `into_dir` is set or `dest` is an
    /// existing directory, in which case they land at `dest/<name>`.
    /// Directories have their contents merged into `dest`.
    pub fn graft(&mut self, subtree: Subtree, dest: &str, name: &str, into_dir: bool) {
        let dest = self.resolve(dest);
        if into_dir {
            self.mkdir_all(&dest);
        }

        match subtree {
            Subtree::File(entry) => {
                let target = if into_dir || self.is_dir(&dest) {
                    join_path(&dest, name)
                } else {
                    dest
                };
                self.put(&target, entry);
            }
            Subtree::Dir(children) => {
                self.mkdir_all(&dest);
                for (rel, entry) in children {
                    self.put(&join_path(&dest, &rel), entry);
                }
            }
        }
    }

    /// Compute the changes that turn this snapshot's tree into `after`
    pub fn changes_to(&self, after: &BTreeMap<String, Entry>) -> Vec<Change> {
        let mut changes = Vec::new();

        for (path, entry) in after {
            if path == "/" {
                continue;
            }
            if self.entries.get(path) != Some(entry) {
                changes.push(Change::Upsert {
                    path: path.clone(),
                    entry: entry.clone(),
                });
            }
        }

        for path in self.entries.keys() {
            if path != "/" && !after.contains_key(path) {
                changes.push(Change::Remove { path: path.clone() });
            }
        }

        changes
    }

    /// Number of regular files
    pub fn file_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_dir()).count()
    }

    /// Total size of all files in bytes
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(Entry::size).sum()
    }

    /// Content digest over the tree and the config
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();

        for (path, entry) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            match entry {
                Entry::File { contents, mode } => {
                    hasher.update(b"f");
                    hasher.update(&mode.to_le_bytes());
                    hasher.update(&(contents.len() as u64).to_le_bytes());
                    hasher.update(contents);
                }
                Entry::Dir { mode } => {
                    hasher.update(b"d");
                    hasher.update(&mode.to_le_bytes());
                }
            }
        }

        // BTreeMaps serialize in key order, so this is stable
        if let Ok(config) = serde_json::to_vec(&self.config) {
            hasher.update(&config);
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Seal the snapshot; no further mutation is possible
    pub fn seal(self) -> SealedSnapshot {
        SealedSnapshot(Arc::new(self))
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut current = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            current.push('/');
            current.push_str(segment);
            // A file in the way of a parent is replaced by a directory
            if !self.entries.get(&current).map(Entry::is_dir).unwrap_or(false) {
                self.entries.insert(current.clone(), Entry::dir());
            }
        }
    }

    fn remove_descendants(&mut self, path: &str) {
        let prefix = dir_prefix(path);
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| p.clone())
            .collect();
        for p in doomed {
            self.entries.remove(&p);
        }
    }
}

/// An immutable, shareable snapshot of a finished stage
#[derive(Debug, Clone)]
pub struct SealedSnapshot(Arc<Snapshot>);

impl SealedSnapshot {
    /// Copy the sealed state into a fresh snapshot for a derived stage
    pub fn to_snapshot(&self) -> Snapshot {
        self.0.as_ref().clone()
    }
}

impl Deref for SealedSnapshot {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.0
    }
}

/// Normalize `path` against `base`, collapsing `.` and `..`
///
/// The result is always absolute; `..` never climbs above the root.
pub fn normalize_path(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !path.starts_with('/') {
        parts.extend(base.split('/').filter(|s| !s.is_empty() && *s != "."));
    }

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Last path component, or an empty string for the root
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn join_path(dir: &str, rel: &str) -> String {
    if dir == "/" {
        format!("/{}", rel)
    } else {
        format!("{}/{}", dir, rel)
    }
}

fn dir_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

/// Read a host directory into entries keyed by absolute path below `root`
///
/// `skip` receives paths relative to `root` (no leading slash); skipped
/// directories are not descended into.
pub(crate) fn read_dir_tree(
    root: &Path,
    skip: &dyn Fn(&str) -> bool,
) -> Result<BTreeMap<String, Entry>, BuildError> {
    let mut entries = BTreeMap::new();
    entries.insert("/".to_string(), Entry::dir());
    walk_dir(root, root, skip, &mut entries)?;
    Ok(entries)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    skip: &dyn Fn(&str) -> bool,
    entries: &mut BTreeMap<String, Entry>,
) -> Result<(), BuildError> {
    let read_dir = std::fs::read_dir(current).map_err(|e| BuildError::FileReadError {
        path: current.to_path_buf(),
        error: e.to_string(),
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|e| BuildError::FileReadError {
            path: current.to_path_buf(),
            error: e.to_string(),
        })?;
        let path = entry.path();

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if skip(&relative) {
            continue;
        }

        let Ok(metadata) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        // Snapshots hold only files and directories; links are not recorded
        if metadata.file_type().is_symlink() {
            tracing::debug!(path = %path.display(), "Skipping symbolic link");
            continue;
        }

        let key = format!("/{}", relative);
        if metadata.is_dir() {
            entries.insert(
                key,
                Entry::Dir {
                    mode: mode_of(&metadata, DEFAULT_DIR_MODE),
                },
            );
            walk_dir(root, &path, skip, entries)?;
        } else {
            let contents = std::fs::read(&path).map_err(|e| BuildError::FileReadError {
                path: path.clone(),
                error: e.to_string(),
            })?;
            entries.insert(key, Entry::file(contents, mode_of(&metadata, DEFAULT_FILE_MODE)));
        }
    }

    Ok(())
}

/// Write entries below `root` on the host filesystem
pub(crate) fn write_tree(entries: &BTreeMap<String, Entry>, root: &Path) -> Result<(), BuildError> {
    for (path, entry) in entries {
        let target = root.join(path.trim_start_matches('/'));
        match entry {
            Entry::Dir { .. } => {
                std::fs::create_dir_all(&target).map_err(|e| BuildError::FileWriteError {
                    path: target.clone(),
                    error: e.to_string(),
                })?;
            }
            Entry::File { contents, mode } => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| BuildError::FileWriteError {
                        path: parent.to_path_buf(),
                        error: e.to_string(),
                    })?;
                }
                std::fs::write(&target, contents).map_err(|e| BuildError::FileWriteError {
                    path: target.clone(),
                    error: e.to_string(),
                })?;
                set_mode(&target, *mode)?;
            }
        }
    }

    // Children first, so a restrictive parent mode never blocks them
    for (path, entry) in entries.iter().rev() {
        if let (Entry::Dir { mode }, false) = (entry, path == "/") {
            set_mode(&root.join(path.trim_start_matches('/')), *mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn mode_of(metadata: &std::fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn mode_of(_metadata: &std::fs::Metadata, default: u32) -> u32 {
    default
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), BuildError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        BuildError::FileWriteError {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), BuildError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/", "app"), "/app");
        assert_eq!(normalize_path("/app", "."), "/app");
        assert_eq!(normalize_path("/app", "src/../lib/"), "/app/lib");
        assert_eq!(normalize_path("/app", "/etc//hosts"), "/etc/hosts");
        assert_eq!(normalize_path("/", "../../x"), "/x");
        assert_eq!(base_name("/opt/venv/"), "venv");
    }

    #[test]
    fn test_put_creates_parents() {
        let mut snapshot = Snapshot::empty();
        snapshot.put("/usr/lib/python/site.py", Entry::file("x", 0o644));

        assert!(snapshot.is_dir("/usr"));
        assert!(snapshot.is_dir("/usr/lib/python"));
        assert_eq!(snapshot.file_count(), 1);
    }

    #[test]
    fn test_relative_paths_follow_workdir() {
        let mut snapshot = Snapshot::empty();
        snapshot.config_mut().workdir = "/app".into();
        snapshot.put("manage.py", Entry::file("print()", 0o755));

        assert!(snapshot.contains("/app/manage.py"));
        assert!(snapshot.contains("manage.py"));
    }

    #[test]
    fn test_remove_drops_descendants() {
        let mut snapshot = Snapshot::empty();
        snapshot.put("/tmp/a/b.txt", Entry::file("b", 0o644));
        snapshot.put("/tmp/c.txt", Entry::file("c", 0o644));
        snapshot.put("/tmpfile", Entry::file("keep", 0o644));

        snapshot.remove("/tmp");

        assert!(!snapshot.contains("/tmp/a/b.txt"));
        assert!(!snapshot.contains("/tmp"));
        assert!(snapshot.contains("/tmpfile"));
    }

    #[test]
    fn test_subtree_and_graft_directory() {
        let mut source = Snapshot::empty();
        source.put("/install/lib/pkg/__init__.py", Entry::file("", 0o644));
        source.put("/install/bin/tool", Entry::file("#!", 0o755));

        let subtree = source.subtree("/install").unwrap();
        assert_eq!(subtree.len(), 5);

        let mut target = Snapshot::empty();
        target.graft(subtree, "/libs", "install", false);

        assert!(target.contains("/libs/lib/pkg/__init__.py"));
        assert!(target.contains("/libs/bin/tool"));
        assert!(!target.contains("/libs/install"));
    }

    #[test]
    fn test_graft_file_into_existing_dir() {
        let mut target = Snapshot::empty();
        target.config_mut().workdir = "/app".into();
        target.mkdir_all("/app");

        target.graft(
            Subtree::File(Entry::file("django", 0o644)),
            ".",
            "requirements.txt",
            false,
        );
        assert!(target.contains("/app/requirements.txt"));

        target.graft(Subtree::File(Entry::file("x", 0o644)), "/opt/renamed.txt", "a.txt", false);
        assert!(target.contains("/opt/renamed.txt"));
    }

    #[test]
    fn test_changes_round_trip() {
        let mut before = Snapshot::empty();
        before.put("/a.txt", Entry::file("a", 0o644));
        before.put("/gone/x", Entry::file("x", 0o644));

        let mut after = before.clone();
        after.put("/a.txt", Entry::file("changed", 0o644));
        after.put("/new/b.txt", Entry::file("b", 0o644));
        after.remove("/gone");

        let changes = before.changes_to(after.entries());
        let mut replayed = before.clone();
        replayed.apply(&changes);

        assert_eq!(replayed.entries(), after.entries());
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let mut a = Snapshot::empty();
        a.put("/x", Entry::file("1", 0o644));
        let b = a.clone();
        assert_eq!(a.digest(), b.digest());

        a.config_mut().env.insert("K".into(), "V".into());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_sealed_snapshot_copies_on_derive() {
        let mut base = Snapshot::empty();
        base.put("/etc/os-release", Entry::file("slim", 0o644));
        let sealed = base.seal();

        let mut derived = sealed.to_snapshot();
        derived.put("/etc/extra", Entry::file("x", 0o644));

        assert!(!sealed.contains("/etc/extra"));
        assert!(derived.contains("/etc/os-release"));
    }

    #[test]
    fn test_read_and_write_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut snapshot = Snapshot::empty();
        snapshot.put("/app/main.py", Entry::file("print('hi')", 0o644));
        snapshot.mkdir_all("/var/empty");

        write_tree(snapshot.entries(), dir.path()).unwrap();
        let read = read_dir_tree(dir.path(), &|_| false).unwrap();

        assert_eq!(
            read.get("/app/main.py"),
            Some(&Entry::file("print('hi')", 0o644))
        );
        assert!(read.get("/var/empty").map(Entry::is_dir).unwrap_or(false));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_tree_keeps_directory_modes() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut snapshot = Snapshot::empty();
        snapshot.put("/tmp", Entry::Dir { mode: 0o1777 });
        snapshot.put("/srv", Entry::Dir { mode: 0o750 });
        snapshot.put("/srv/data/seed.txt", Entry::file("seed", 0o600));

        write_tree(snapshot.entries(), dir.path()).unwrap();
        let read = read_dir_tree(dir.path(), &|_| false).unwrap();

        assert_eq!(read.get("/tmp"), Some(&Entry::Dir { mode: 0o1777 }));
        assert_eq!(read.get("/srv"), Some(&Entry::Dir { mode: 0o750 }));
        assert_eq!(snapshot.changes_to(&read), Vec::new());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_tree_skips_symlinks() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/main.py"), "print('hi')").unwrap();
        std::os::unix::fs::symlink(".", dir.path().join("app/loop")).unwrap();
        std::os::unix::fs::symlink("main.py", dir.path().join("app/entry.py")).unwrap();

        let read = read_dir_tree(dir.path(), &|_| false).unwrap();

        assert!(read.contains_key("/app/main.py"));
        assert!(!read.contains_key("/app/loop"));
        assert!(!read.contains_key("/app/entry.py"));
        assert_eq!(read.len(), 3);
    }
}
