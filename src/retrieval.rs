//! Read-side service: reconstruct ingested PDFs from the content store.
//!
//! Retrieval is deliberately forgiving about where bytes live. Every lookup
//! walks remote → local canonical → local legacy layouts, promoting whatever
//! it finds back to the canonical remote key, so a store that drifted (old
//! deployments, partial uploads, remote outages) heals itself under read
//! traffic.
//!
//! Audio goes one step further: when neither tier has the page's MP3 but the
//! explanation text survives, the narration capability re-synthesises it on
//! the spot and both tiers are backfilled before the bytes are served. Only
//! a missing page *image* is unrecoverable — that needs the source PDF.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::LecternError;
use crate::explain::Explainer;
use crate::narrate::{prepare_speech_text, Narrator};
use crate::pipeline::encode;
use crate::pipeline::PagePayload;
use crate::quiz::{self, QuizQuestion};
use crate::store::{keys, ArtifactKind, ContentStore};

/// Cap on the explanation text handed to the quiz prompt.
const QUIZ_CONTENT_CHAR_LIMIT: usize = 8000;
/// Tighter cap for the simplified retry prompt.
const QUIZ_RETRY_CHAR_LIMIT: usize = 4000;
/// How many stored page explanations augment a question's context.
const ANSWER_CONTEXT_PAGE_LIMIT: usize = 3;

/// How a binary artifact is best served to the caller.
pub enum ArtifactSource {
    /// Redirect target: a time-limited remote URL.
    Url(String),
    /// Serve these bytes directly.
    Bytes(Vec<u8>),
}

/// Everything stored for one page.
pub struct PageContent {
    pub page_number: usize,
    pub image: Vec<u8>,
    pub explanation: String,
    pub audio: Option<Vec<u8>>,
}

/// Listing entry for a user's PDFs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSummary {
    pub name: String,
    pub total_pages: i64,
    pub date_processed: String,
    pub original_filename: String,
}

/// Response body for the use-existing flow. Only page 1 carries inline
/// base64 image/audio; later pages lean on the URL fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingPdf {
    pub total_pages: usize,
    pub pdf_name: String,
    pub pages: Vec<PagePayload>,
}

/// Result of a filename-based existence probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilenameCheck {
    pub exists: bool,
    pub base_name: String,
    pub versions: Vec<String>,
}

/// Read-side orchestration over the store, catalog, and AI capabilities.
pub struct RetrievalService {
    store: Arc<ContentStore>,
    catalog: Arc<Catalog>,
    explainer: Arc<dyn Explainer>,
    narrator: Arc<dyn Narrator>,
    url_ttl_secs: u64,
}

impl RetrievalService {
    pub fn new(
        store: Arc<ContentStore>,
        catalog: Arc<Catalog>,
        explainer: Arc<dyn Explainer>,
        narrator: Arc<dyn Narrator>,
        url_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            catalog,
            explainer,
            narrator,
            url_ttl_secs,
        }
    }

    // ── Page count ────────────────────────────────────────────────────────

    /// Authoritative page count for a storage key.
    ///
    /// Catalog first; when the catalog is short (stale replica, pre-catalog
    /// data) the store itself is probed: the highest page number among image
    /// keys under the prefix, remote then local. Nothing found is a
    /// not-found, not a zero.
    pub async fn resolve_page_count(&self, storage_key: &str) -> Result<usize, LecternError> {
        if let Some(record) = self.catalog.lookup_by_key(storage_key).await? {
            if record.page_count > 0 {
                return Ok(record.page_count as usize);
            }
        }

        let prefix = format!("{storage_key}/");
        let remote_max = max_image_page(&self.store.list_remote(&prefix).await);
        if let Some(n) = remote_max {
            return Ok(n);
        }
        if let Some(n) = max_image_page(&self.store.list_local(&prefix)) {
            return Ok(n);
        }

        Err(LecternError::NotFound(format!(
            "no pages found for '{storage_key}'"
        )))
    }

    /// Whether any processed material exists for this storage key.
    pub async fn exists(&self, storage_key: &str) -> bool {
        self.resolve_page_count(storage_key).await.is_ok()
    }

    // ── Artifact lookup ───────────────────────────────────────────────────

    /// Fetch one page artifact, walking remote → local canonical → local
    /// legacy layouts. A local hit is promoted to the canonical remote key.
    pub async fn fetch_page_artifact(
        &self,
        storage_key: &str,
        kind: ArtifactKind,
        page: usize,
    ) -> Option<Vec<u8>> {
        let canonical = keys::page(storage_key, kind, page);

        if let Some(bytes) = self.store.read_remote(&canonical).await {
            return Some(bytes);
        }
        if let Some(bytes) = self.store.read_local(&canonical) {
            let _ = self.store.promote(&canonical, &bytes, kind.content_type()).await;
            return Some(bytes);
        }
        for variant in keys::legacy_page_variants(storage_key, kind, page) {
            if let Some(bytes) = self.store.read_local(&variant) {
                let _ = self.store.promote(&canonical, &bytes, kind.content_type()).await;
                return Some(bytes);
            }
        }
        None
    }

    /// Full content of one page. `None` when the page image does not exist —
    /// text and audio alone do not make a page.
    pub async fn get_page(
        &self,
        storage_key: &str,
        page: usize,
    ) -> Result<Option<PageContent>, LecternError> {
        let Some(image) = self
            .fetch_page_artifact(storage_key, ArtifactKind::Image, page)
            .await
        else {
            return Ok(None);
        };

        let explanation = self
            .fetch_page_artifact(storage_key, ArtifactKind::Text, page)
            .await
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let audio = self
            .fetch_page_artifact(storage_key, ArtifactKind::Audio, page)
            .await;

        Ok(Some(PageContent {
            page_number: page,
            image,
            explanation,
            audio,
        }))
    }

    /// Locate a binary page artifact for serving: a signed remote URL when
    /// the remote tier can produce one, the bytes themselves otherwise.
    async fn locate_binary(
        &self,
        storage_key: &str,
        kind: ArtifactKind,
        page: usize,
    ) -> Option<ArtifactSource> {
        let canonical = keys::page(storage_key, kind, page);

        if self.store.exists_remote(&canonical).await {
            if let Some(url) = self.store.read_url(&canonical, self.url_ttl_secs).await {
                return Some(ArtifactSource::Url(url));
            }
            if let Some(bytes) = self.store.read_remote(&canonical).await {
                return Some(ArtifactSource::Bytes(bytes));
            }
        }

        let mut candidates = vec![canonical.clone()];
        candidates.extend(keys::legacy_page_variants(storage_key, kind, page));
        for candidate in candidates {
            let Some(bytes) = self.store.read_local(&candidate) else {
                continue;
            };
            if bytes.is_empty() {
                warn!(key = %candidate, "skipping empty local artifact");
                continue;
            }
            // Promote, then prefer redirecting to the fresh remote copy.
            if self.store.promote(&canonical, &bytes, kind.content_type()).await {
                if let Some(url) = self.store.read_url(&canonical, self.url_ttl_secs).await {
                    return Some(ArtifactSource::Url(url));
                }
            }
            return Some(ArtifactSource::Bytes(bytes));
        }

        None
    }

    /// Serve a page image: signed URL, else local bytes. No regeneration —
    /// a lost image needs the source PDF.
    pub async fn get_image(
        &self,
        storage_key: &str,
        page: usize,
    ) -> Result<Option<ArtifactSource>, LecternError> {
        Ok(self.locate_binary(storage_key, ArtifactKind::Image, page).await)
    }

    /// Serve page audio with the three-tier fallback: signed remote URL →
    /// local file → regeneration from the stored explanation text. A
    /// regenerated clip is written back to both tiers before being served.
    pub async fn get_audio(
        &self,
        storage_key: &str,
        page: usize,
    ) -> Result<Option<ArtifactSource>, LecternError> {
        if let Some(source) = self.locate_binary(storage_key, ArtifactKind::Audio, page).await {
            return Ok(Some(source));
        }

        let Some(text) = self
            .fetch_page_artifact(storage_key, ArtifactKind::Text, page)
            .await
        else {
            return Ok(None);
        };

        info!(storage_key, page, "regenerating missing audio from stored text");
        let speech = prepare_speech_text(&String::from_utf8_lossy(&text), page);
        match self.narrator.synthesize(&speech).await {
            Ok(audio) => {
                let _ = self
                    .store
                    .write(
                        &keys::page(storage_key, ArtifactKind::Audio, page),
                        &audio,
                        ArtifactKind::Audio.content_type(),
                    )
                    .await;
                Ok(Some(ArtifactSource::Bytes(audio)))
            }
            Err(e) => {
                warn!(storage_key, page, error = %e, "audio regeneration failed");
                Ok(None)
            }
        }
    }

    // ── Existing-PDF assembly ─────────────────────────────────────────────

    /// Rebuild the full page set for an already-ingested PDF.
    ///
    /// By contract only page 1 carries inline base64 image/audio; all pages
    /// carry their explanation and per-page URLs.
    pub async fn assemble_existing(
        &self,
        storage_key: &str,
    ) -> Result<ExistingPdf, LecternError> {
        let total_pages = self.resolve_page_count(storage_key).await?;
        let mut pages = Vec::with_capacity(total_pages);

        for page in 1..=total_pages {
            let explanation = self
                .fetch_page_artifact(storage_key, ArtifactKind::Text, page)
                .await
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();

            let (image, audio) = if page == 1 {
                let image = self
                    .fetch_page_artifact(storage_key, ArtifactKind::Image, page)
                    .await
                    .map(|b| STANDARD.encode(b))
                    .unwrap_or_default();
                let audio = self
                    .fetch_page_artifact(storage_key, ArtifactKind::Audio, page)
                    .await
                    .map(|b| STANDARD.encode(b))
                    .unwrap_or_default();
                (image, audio)
            } else {
                (String::new(), String::new())
            };

            pages.push(PagePayload {
                page_number: page,
                image,
                explanation,
                audio,
                audio_url: format!("/pdf/{storage_key}/audio/{page}"),
                image_url: format!("/pdf/{storage_key}/image/{page}"),
            });
        }

        Ok(ExistingPdf {
            total_pages,
            pdf_name: storage_key.to_string(),
            pages,
        })
    }

    // ── Listings & probes ─────────────────────────────────────────────────

    /// Every PDF linked to a user, newest link first, with the original
    /// filename recovered from the metadata blob when it survives.
    pub async fn list_user_pdfs(&self, user_id: i64) -> Result<Vec<PdfSummary>, LecternError> {
        let records = self.catalog.list_for_user(user_id).await?;
        let mut summaries = Vec::with_capacity(records.len());

        for record in records {
            let original_filename = match self
                .store
                .fetch(&keys::metadata(&record.storage_key), "application/json")
                .await
            {
                Some(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes)
                    .ok()
                    .and_then(|v| {
                        v.get("original_filename")
                            .and_then(|f| f.as_str())
                            .map(String::from)
                    })
                    .unwrap_or_else(|| record.title.clone()),
                None => record.title.clone(),
            };

            summaries.push(PdfSummary {
                name: record.storage_key.clone(),
                total_pages: record.page_count,
                date_processed: chrono::DateTime::from_timestamp(record.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
                original_filename,
            });
        }

        Ok(summaries)
    }

    /// Probe by display filename: all storage-key versions sharing the
    /// cleaned base name, from the catalog first and the store as fallback.
    pub async fn check_by_filename(
        &self,
        filename: &str,
    ) -> Result<FilenameCheck, LecternError> {
        let base = crate::hash::slugify_filename(filename);
        let mut versions = self.catalog.lookup_versions_by_base_name(&base).await?;

        if versions.is_empty() && self.original_exists(&base).await {
            // Pre-catalog layouts used bare and counter-suffixed base names.
            versions.push(base.clone());
            let mut counter = 2;
            while self.original_exists(&format!("{base}_{counter}")).await {
                versions.push(format!("{base}_{counter}"));
                counter += 1;
            }
        }

        Ok(FilenameCheck {
            exists: !versions.is_empty(),
            base_name: base,
            versions,
        })
    }

    /// Whether a storage key's original PDF exists in either tier.
    async fn original_exists(&self, storage_key: &str) -> bool {
        let key = keys::original(storage_key);
        self.store.exists(&key).await || self.store.exists_local(&key)
    }

    // ── Question answering ────────────────────────────────────────────────

    /// Answer a free-form question, enriching the caller's context with up
    /// to [`ANSWER_CONTEXT_PAGE_LIMIT`] stored page explanations for the
    /// named PDF. Failure to gather extra context never fails the question.
    pub async fn answer_question(
        &self,
        question: &str,
        context: &str,
        storage_key: Option<&str>,
    ) -> Result<String, LecternError> {
        let mut full_context = context.to_string();

        if let Some(key) = storage_key.filter(|k| !k.is_empty()) {
            if let Ok(page_count) = self.resolve_page_count(key).await {
                let mut added = 0;
                for page in 1..=page_count {
                    if added == ANSWER_CONTEXT_PAGE_LIMIT {
                        break;
                    }
                    if let Some(bytes) = self
                        .fetch_page_artifact(key, ArtifactKind::Text, page)
                        .await
                    {
                        full_context.push_str("\n\n");
                        full_context.push_str(&String::from_utf8_lossy(&bytes));
                        added += 1;
                    }
                }
            }
        }

        let raw = self.explainer.answer_question(&full_context, question).await?;
        Ok(strip_answer_preamble(raw.trim()).to_string())
    }

    // ── Quiz ──────────────────────────────────────────────────────────────

    /// Produce (or recall) the quiz for a storage key.
    ///
    /// Memoised: an existing quiz blob in either tier is returned verbatim.
    /// Otherwise explanation texts are gathered (re-summarising page images
    /// when no text survives at all), capped, and sent to the model; the
    /// response goes through JSON repair and shape validation with one
    /// simplified retry. A valid result is persisted to both tiers before
    /// being returned.
    pub async fn generate_quiz(
        &self,
        storage_key: &str,
    ) -> Result<Vec<QuizQuestion>, LecternError> {
        let quiz_key = keys::quiz(storage_key);
        if let Some(bytes) = self.store.fetch(&quiz_key, "application/json").await {
            match serde_json::from_slice::<Vec<QuizQuestion>>(&bytes) {
                Ok(existing) => return Ok(existing),
                Err(e) => warn!(storage_key, error = %e, "stored quiz unreadable; regenerating"),
            }
        }

        let page_count = self.resolve_page_count(storage_key).await?;

        let mut texts = Vec::new();
        for page in 1..=page_count {
            if let Some(bytes) = self
                .fetch_page_artifact(storage_key, ArtifactKind::Text, page)
                .await
            {
                texts.push(String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        if texts.is_empty() {
            info!(storage_key, "no stored explanations; summarising page images");
            for page in 1..=page_count {
                let Some(jpeg) = self
                    .fetch_page_artifact(storage_key, ArtifactKind::Image, page)
                    .await
                else {
                    continue;
                };
                match self.explainer.summarize_page(&encode::image_payload(&jpeg)).await {
                    Ok(summary) => texts.push(summary),
                    Err(e) => warn!(storage_key, page, error = %e, "page summary failed"),
                }
            }
        }

        if texts.is_empty() {
            return Err(LecternError::QuizNoContent);
        }

        let combined = texts.join("\n\n");

        let primary = self
            .explainer
            .draft_quiz(truncate_chars(&combined, QUIZ_CONTENT_CHAR_LIMIT), 5)
            .await?;
        let questions = match quiz::parse_quiz(&primary) {
            Ok(questions) => questions,
            Err(first_err) => {
                // The single retry in the system: simplified prompt, fewer
                // questions, shorter content.
                warn!(storage_key, error = %first_err, "quiz response malformed; retrying simplified");
                let retry = self
                    .explainer
                    .draft_quiz(truncate_chars(&combined, QUIZ_RETRY_CHAR_LIMIT), 3)
                    .await?;
                quiz::parse_quiz(&retry)?
            }
        };

        let serialized = serde_json::to_vec(&questions)
            .map_err(|e| LecternError::Internal(format!("quiz serialisation: {e}")))?;
        let _ = self.store.write(&quiz_key, &serialized, "application/json").await;

        Ok(questions)
    }

    // ── Packaging ─────────────────────────────────────────────────────────

    /// Bundle every surviving artifact category into one zip:
    /// images, texts, audio, quiz, the original PDF, and the metadata blob.
    /// Categories with nothing present are omitted.
    pub async fn package_materials(
        &self,
        storage_key: &str,
    ) -> Result<(String, Vec<u8>), LecternError> {
        let page_count = self.resolve_page_count(storage_key).await?;

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut archive = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();

            for page in 1..=page_count {
                let entries = [
                    (ArtifactKind::Image, format!("image_files/page_{page}.jpg")),
                    (ArtifactKind::Text, format!("text_files/page_{page}.md")),
                    (ArtifactKind::Audio, format!("audio_files/page_{page}.mp3")),
                ];
                for (kind, entry_name) in entries {
                    if let Some(bytes) =
                        self.fetch_page_artifact(storage_key, kind, page).await
                    {
                        archive
                            .start_file(entry_name, options)
                            .map_err(zip_error)?;
                        archive.write_all(&bytes)?;
                    }
                }
            }

            if let Some(bytes) = self
                .store
                .fetch(&keys::quiz(storage_key), "application/json")
                .await
            {
                archive
                    .start_file("quiz_data/quiz.json", options)
                    .map_err(zip_error)?;
                archive.write_all(&bytes)?;
            }
            if let Some(bytes) = self
                .store
                .fetch(&keys::original(storage_key), "application/pdf")
                .await
            {
                archive
                    .start_file(format!("{storage_key}.pdf"), options)
                    .map_err(zip_error)?;
                archive.write_all(&bytes)?;
            }
            if let Some(bytes) = self
                .store
                .fetch(&keys::metadata(storage_key), "application/json")
                .await
            {
                archive
                    .start_file("metadata.json", options)
                    .map_err(zip_error)?;
                archive.write_all(&bytes)?;
            }

            archive.finish().map_err(zip_error)?;
        }

        Ok((
            format!("{storage_key}_study_materials.zip"),
            cursor.into_inner(),
        ))
    }
}

fn zip_error(e: zip::result::ZipError) -> LecternError {
    LecternError::Internal(format!("zip assembly failed: {e}"))
}

/// Highest page number among image keys, if any.
fn max_image_page(listing: &[String]) -> Option<usize> {
    listing
        .iter()
        .filter_map(|key| keys::page_number_from_image_key(key))
        .max()
}

/// Cut a string to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

static RE_ANSWER_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(Think and Response\.?|Based on the context,|According to the context,)\s*")
        .expect("valid regex")
});

/// Drop boilerplate openers models prepend despite being told not to.
fn strip_answer_preamble(answer: &str) -> &str {
    match RE_ANSWER_PREAMBLE.find(answer) {
        Some(m) => &answer[m.end()..],
        None => answer,
    }
}
