//! Content-addressed artifact store spanning two tiers.
//!
//! [`ContentStore`] presents one logical namespace of `/`-separated keys
//! backed by two tiers: the always-available local filesystem
//! ([`LocalTier`]) and an optional remote object store (anything
//! implementing [`RemoteTier`], in production [`S3RemoteTier`]).
//!
//! ## Tier policy
//!
//! * Reads go remote-first whenever the remote tier is configured.
//! * A hit that only the local tier can serve is opportunistically
//!   *promoted*: the bytes are re-written to the remote tier as part of the
//!   read, and a promotion failure never fails the read. Over time this
//!   mirrors the tiers without any reconciliation pass — and without any
//!   consistency guarantee when the remote side is flaky.
//! * Writes land on the local tier first, then best-effort on the remote
//!   tier. The returned `bool` reports whether every reachable tier took
//!   the write; most call sites deliberately ignore it.
//!
//! ## Key layout
//!
//! All artifacts of one processed PDF live under its storage key:
//!
//! ```text
//! <key>/original.pdf      <key>/metadata.json     <key>/quiz.json
//! <key>/page_<N>.jpg      <key>/page_<N>.md       <key>/page_<N>.mp3
//! ```
//!
//! Earlier deployments spread page artifacts across per-type subfolders
//! (`<key>/image_files/<key>_page_<N>.jpg` and a short form without the key
//! prefix). Read paths still accept both legacy layouts; writes only ever
//! produce the canonical one.

mod local;
mod remote;

pub use local::LocalTier;
pub use remote::S3RemoteTier;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// The optional second tier: a remote blob store.
///
/// Every method degrades to a boolean/null result instead of erroring; the
/// caller cannot distinguish "absent" from "unreachable", and is not meant
/// to.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn exists(&self, key: &str) -> bool;
    async fn read(&self, key: &str) -> Option<Vec<u8>>;
    async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> bool;
    /// Enumerate keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Vec<String>;
    /// Issue a time-limited direct-access URL for an existing key.
    async fn read_url(&self, key: &str, ttl_secs: u64) -> Option<String>;
}

/// Two-tier content store. Cheap to clone (`Arc` internals).
#[derive(Clone)]
pub struct ContentStore {
    local: LocalTier,
    remote: Option<Arc<dyn RemoteTier>>,
}

impl ContentStore {
    pub fn new(local_root: impl Into<PathBuf>, remote: Option<Arc<dyn RemoteTier>>) -> Self {
        Self {
            local: LocalTier::new(local_root),
            remote,
        }
    }

    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteTier>> {
        self.remote.as_ref()
    }

    /// Existence probe. Checks the remote tier when configured, the local
    /// tier otherwise — never both; fallback across tiers is the caller's
    /// orchestration, not this call's.
    pub async fn exists(&self, key: &str) -> bool {
        match &self.remote {
            Some(remote) => remote.exists(key).await,
            None => self.local.exists(key),
        }
    }

    pub async fn exists_remote(&self, key: &str) -> bool {
        match &self.remote {
            Some(remote) => remote.exists(key).await,
            None => false,
        }
    }

    pub fn exists_local(&self, key: &str) -> bool {
        self.local.exists(key)
    }

    pub async fn read_remote(&self, key: &str) -> Option<Vec<u8>> {
        match &self.remote {
            Some(remote) => remote.read(key).await,
            None => None,
        }
    }

    pub fn read_local(&self, key: &str) -> Option<Vec<u8>> {
        self.local.read(key)
    }

    /// Remote-first read with promotion: a local-only hit is written back to
    /// the remote tier (same key) before being returned. Promotion failure
    /// never fails the read.
    pub async fn fetch(&self, key: &str, content_type: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.read_remote(key).await {
            return Some(bytes);
        }
        let bytes = self.local.read(key)?;
        let _ = self.promote(key, &bytes, content_type).await;
        Some(bytes)
    }

    /// Copy already-read local bytes up to the remote tier under `key`.
    /// Returns whether the copy landed; callers typically ignore it.
    pub async fn promote(&self, key: &str, bytes: &[u8], content_type: &str) -> bool {
        match &self.remote {
            Some(remote) => {
                debug!(key, "promoting local artifact to remote tier");
                remote.write(key, bytes, content_type).await
            }
            None => false,
        }
    }

    /// Write to every reachable tier: local always, remote when configured.
    /// Best-effort on both sides; `true` only when nothing failed.
    pub async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> bool {
        let local_ok = self.local.write(key, bytes);
        let remote_ok = match &self.remote {
            Some(remote) => remote.write(key, bytes, content_type).await,
            None => true,
        };
        local_ok && remote_ok
    }

    /// Time-limited direct-access URL (remote tier only).
    pub async fn read_url(&self, key: &str, ttl_secs: u64) -> Option<String> {
        match &self.remote {
            Some(remote) => remote.read_url(key, ttl_secs).await,
            None => None,
        }
    }

    /// Enumerate remote keys under a prefix (empty without a remote tier).
    pub async fn list_remote(&self, prefix: &str) -> Vec<String> {
        match &self.remote {
            Some(remote) => remote.list(prefix).await,
            None => Vec::new(),
        }
    }

    /// Enumerate local keys under a prefix.
    pub fn list_local(&self, prefix: &str) -> Vec<String> {
        self.local.list(prefix)
    }

    /// Filesystem path of a key in the local tier.
    pub fn local_path(&self, key: &str) -> PathBuf {
        self.local.path(key)
    }
}

// ── Key layout ───────────────────────────────────────────────────────────

/// The three per-page artifact types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Text,
    Audio,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Image => "jpg",
            ArtifactKind::Text => "md",
            ArtifactKind::Audio => "mp3",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image/jpeg",
            ArtifactKind::Text => "text/markdown",
            ArtifactKind::Audio => "audio/mpeg",
        }
    }

    /// Subfolder name used by the legacy per-type layout.
    fn legacy_folder(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image_files",
            ArtifactKind::Text => "text_files",
            ArtifactKind::Audio => "audio_files",
        }
    }
}

/// Deterministic key construction for every artifact of a processed PDF.
pub mod keys {
    use super::ArtifactKind;
    use once_cell::sync::Lazy;
    use regex::Regex;

    pub fn original(storage_key: &str) -> String {
        format!("{storage_key}/original.pdf")
    }

    pub fn metadata(storage_key: &str) -> String {
        format!("{storage_key}/metadata.json")
    }

    pub fn quiz(storage_key: &str) -> String {
        format!("{storage_key}/quiz.json")
    }

    pub fn page(storage_key: &str, kind: ArtifactKind, page: usize) -> String {
        format!("{storage_key}/page_{page}.{}", kind.extension())
    }

    /// Legacy key variants accepted on local reads, most common first.
    pub fn legacy_page_variants(storage_key: &str, kind: ArtifactKind, page: usize) -> [String; 2] {
        let folder = kind.legacy_folder();
        let ext = kind.extension();
        [
            format!("{storage_key}/{folder}/{storage_key}_page_{page}.{ext}"),
            format!("{storage_key}/{folder}/page_{page}.{ext}"),
        ]
    }

    static RE_PAGE_IMAGE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"page_(\d+)\.jpg$").expect("valid regex"));

    /// Extract the page number from an image key in either layout.
    pub fn page_number_from_image_key(key: &str) -> Option<usize> {
        RE_PAGE_IMAGE
            .captures(key)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}
