//! Local filesystem tier.
//!
//! Keys map 1:1 onto paths under a root directory; a key like
//! `notes_17/page_1.jpg` lives at `<root>/notes_17/page_1.jpg`. The tier is
//! always available and synchronous — it is the floor the system degrades to
//! when the remote tier is unreachable.

use std::path::{Path, PathBuf};
use tracing::warn;

/// The always-available filesystem tier of the content store.
#[derive(Debug, Clone)]
pub struct LocalTier {
    root: PathBuf,
}

impl LocalTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path for a storage key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Read a key, or `None` when it is absent or unreadable.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        match std::fs::read(self.path(key)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "local tier read failed");
                None
            }
        }
    }

    /// Write a key, creating parent directories. Best-effort: failures are
    /// logged and reported as `false`, never raised.
    pub fn write(&self, key: &str, bytes: &[u8]) -> bool {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(key, error = %e, "local tier mkdir failed");
                return false;
            }
        }
        match std::fs::write(&path, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "local tier write failed");
                false
            }
        }
    }

    /// Enumerate keys under a prefix, sorted. The prefix is interpreted as a
    /// directory; missing prefixes yield an empty list.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let base = self.root.join(prefix.trim_end_matches('/'));
        let mut keys = Vec::new();
        collect_files(&base, &self.root, &mut keys);
        keys.sort();
        keys
    }
}

fn collect_files(dir: &Path, root: &Path, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, root, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            // Keys always use forward slashes, independent of platform.
            out.push(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }
}
