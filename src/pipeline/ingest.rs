//! The ingestion pipeline: hash → dedup → rasterise → per-page explain/narrate
//! → persist, streaming progress as it goes.
//!
//! ## State machine
//!
//! ```text
//! RECEIVED ──▶ HASHED ──▶ DUPLICATE (terminal: link user, no stream)
//!                 │
//!                 └─────▶ RASTERIZING ──▶ PAGE[1..N] ──▶ COMPLETE
//!                                 any failure ──▶ FAILED (error event)
//! ```
//!
//! Pages are processed strictly in ascending order, one at a time: peak
//! memory stays at one decoded page, and progress accounting is trivial. The
//! price — wall-clock linear in page count — is accepted.
//!
//! ## The stream is the progress channel
//!
//! [`IngestPipeline::ingest`] returns either a duplicate short-circuit or a
//! stream of [`IngestEvent`]s produced by a spawned task through an
//! unbounded channel (per-page payloads are small; buffering is not a
//! concern). When the consumer goes away the next send fails and the task
//! stops: the in-flight page finishes, no further pages start, and nothing
//! already persisted is rolled back. Partially ingested documents are a
//! legitimate terminal state.
//!
//! Two racing uploads of the same brand-new PDF can both pass the unknown-
//! hash check and both do the page work; the catalog's uniqueness constraint
//! collapses them to one record at insert time. Duplicate *work* in that
//! window is accepted — see `DESIGN.md`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::IngestOptions;
use crate::error::LecternError;
use crate::explain::Explainer;
use crate::hash;
use crate::narrate::{prepare_speech_text, Narrator};
use crate::pipeline::{encode, render::Rasterizer};
use crate::store::{keys, ArtifactKind, ContentStore};

/// One page's full payload, inlined into the stream so the caller can render
/// the page without a second round-trip. `image`/`audio` are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePayload {
    pub page_number: usize,
    pub image: String,
    pub explanation: String,
    pub audio: String,
    pub audio_url: String,
    pub image_url: String,
}

/// Typed progress events emitted while a PDF is processed.
///
/// Serialises to the wire shapes the HTTP stream emits, e.g.
/// `{"type":"progress","progress":51,"page":2,"total_pages":3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IngestEvent {
    Info {
        total_pages: usize,
        pdf_name: String,
    },
    Progress {
        progress: u32,
        page: usize,
        total_pages: usize,
    },
    Page {
        page_data: PagePayload,
    },
    Complete {
        pdf_name: String,
    },
    Existing {
        pdf_name: String,
    },
    Error {
        error: String,
    },
}

/// A boxed stream of ingestion events.
pub type IngestStream = Pin<Box<dyn Stream<Item = IngestEvent> + Send>>;

/// What an upload resolved to.
pub enum IngestOutcome {
    /// Byte-identical PDF already ingested: the caller was linked to the
    /// existing record and no processing happens.
    Existing { pdf_name: String },
    /// New content: events stream as pages complete.
    Stream(IngestStream),
}

impl std::fmt::Debug for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestOutcome::Existing { pdf_name } => f
                .debug_struct("Existing")
                .field("pdf_name", pdf_name)
                .finish(),
            IngestOutcome::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// An upload as received from the HTTP layer.
pub struct UploadedPdf {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Orchestrates hash → dedup → rasterise → per-page processing.
///
/// All collaborators are injected, never global: swap any of them for a fake
/// and the pipeline runs in-process in tests.
pub struct IngestPipeline {
    store: Arc<ContentStore>,
    catalog: Arc<Catalog>,
    rasterizer: Arc<dyn Rasterizer>,
    explainer: Arc<dyn Explainer>,
    narrator: Arc<dyn Narrator>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<ContentStore>,
        catalog: Arc<Catalog>,
        rasterizer: Arc<dyn Rasterizer>,
        explainer: Arc<dyn Explainer>,
        narrator: Arc<dyn Narrator>,
    ) -> Self {
        Self {
            store,
            catalog,
            rasterizer,
            explainer,
            narrator,
        }
    }

    /// Ingest an uploaded PDF for `user_id`.
    ///
    /// Returns [`IngestOutcome::Existing`] without reprocessing when the
    /// content hash is already catalogued; otherwise spawns the processing
    /// task and returns its event stream.
    pub async fn ingest(
        &self,
        upload: UploadedPdf,
        user_id: i64,
        options: IngestOptions,
    ) -> Result<IngestOutcome, LecternError> {
        // RECEIVED: validate and persist to scratch.
        if upload.bytes.len() < 4 || &upload.bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            let n = upload.bytes.len().min(4);
            magic[..n].copy_from_slice(&upload.bytes[..n]);
            return Err(LecternError::NotAPdf { magic });
        }

        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(&upload.bytes)?;

        // HASHED: chunked digest over the scratch copy.
        let content_hash = hash::hash_file(scratch.path())?;
        info!(hash = %content_hash, filename = %upload.filename, "upload hashed");

        // DUPLICATE: link and stop — the source PDF is never reprocessed.
        if let Some(existing) = self.catalog.lookup_by_hash(&content_hash).await? {
            info!(pdf_name = %existing.storage_key, "duplicate upload; linking user");
            self.catalog.link_user(user_id, existing.pdf_id).await?;
            return Ok(IngestOutcome::Existing {
                pdf_name: existing.storage_key,
            });
        }

        let storage_key =
            hash::derive_storage_key(&upload.filename, chrono::Utc::now().timestamp());

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = IngestWorker {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            rasterizer: Arc::clone(&self.rasterizer),
            explainer: Arc::clone(&self.explainer),
            narrator: Arc::clone(&self.narrator),
        };
        tokio::spawn(async move {
            worker
                .run(scratch, upload, content_hash, storage_key, user_id, options, tx)
                .await;
        });

        Ok(IngestOutcome::Stream(Box::pin(
            UnboundedReceiverStream::new(rx),
        )))
    }
}

/// The spawned half of the pipeline: owns the scratch file until cleanup.
struct IngestWorker {
    store: Arc<ContentStore>,
    catalog: Arc<Catalog>,
    rasterizer: Arc<dyn Rasterizer>,
    explainer: Arc<dyn Explainer>,
    narrator: Arc<dyn Narrator>,
}

impl IngestWorker {
    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        scratch: tempfile::NamedTempFile,
        upload: UploadedPdf,
        content_hash: String,
        storage_key: String,
        user_id: i64,
        options: IngestOptions,
        tx: mpsc::UnboundedSender<IngestEvent>,
    ) {
        // Upload the original and its metadata blob. Non-fatal: processing
        // continues against the scratch copy even if the store is short.
        let _ = self
            .store
            .write(
                &keys::original(&storage_key),
                &upload.bytes,
                "application/pdf",
            )
            .await;

        let metadata = serde_json::json!({
            "date_processed": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "original_filename": upload.filename,
            "difficulty_level": options.difficulty,
            "user_id": user_id,
        });
        let _ = self
            .store
            .write(
                &keys::metadata(&storage_key),
                metadata.to_string().as_bytes(),
                "application/json",
            )
            .await;

        // RASTERIZING: page count becomes known here, and only here.
        let images = match self.rasterizer.rasterize(scratch.path()).await {
            Ok(images) => images,
            Err(e) => {
                warn!(error = %e, "rasterisation failed");
                let _ = tx.send(IngestEvent::Error {
                    error: e.to_string(),
                });
                return;
            }
        };
        let page_count = images.len();

        // The catalog row exists only once rasterisation has succeeded, with
        // the authoritative size and page count.
        let record = match self
            .catalog
            .insert_pdf(
                display_title(&upload.filename),
                &storage_key,
                &content_hash,
                upload.bytes.len() as i64,
                page_count as i64,
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let _ = tx.send(IngestEvent::Error {
                    error: e.to_string(),
                });
                return;
            }
        };
        if let Err(e) = self.catalog.link_user(user_id, record.pdf_id).await {
            warn!(error = %e, "linking uploader to record failed");
        }

        if tx
            .send(IngestEvent::Info {
                total_pages: page_count,
                pdf_name: storage_key.clone(),
            })
            .is_err()
        {
            return;
        }

        // PAGE[1..N], strictly ascending. Capability failures degrade the
        // page; they never stop the loop.
        for (idx, image) in images.iter().enumerate() {
            let page_number = idx + 1;

            if tx
                .send(IngestEvent::Progress {
                    progress: progress_percent(page_number, page_count),
                    page: page_number,
                    total_pages: page_count,
                })
                .is_err()
            {
                info!("consumer disconnected; stopping after page {}", idx);
                return;
            }

            let jpeg = match encode::encode_page(image) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    let _ = tx.send(IngestEvent::Error {
                        error: e.to_string(),
                    });
                    return;
                }
            };
            let _ = self
                .store
                .write(
                    &keys::page(&storage_key, ArtifactKind::Image, page_number),
                    &jpeg,
                    ArtifactKind::Image.content_type(),
                )
                .await;

            let vision_image = encode::image_payload(&jpeg);
            let explanation = match self
                .explainer
                .explain_page(&vision_image, &options.difficulty)
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(page = page_number, error = %e, "explanation degraded");
                    format!("Failed to generate explanation for page {page_number}: {e}")
                }
            };
            let _ = self
                .store
                .write(
                    &keys::page(&storage_key, ArtifactKind::Text, page_number),
                    explanation.as_bytes(),
                    ArtifactKind::Text.content_type(),
                )
                .await;

            let speech = prepare_speech_text(&explanation, page_number);
            let audio = match self.narrator.synthesize(&speech).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(page = page_number, error = %e, "narration degraded");
                    Vec::new()
                }
            };
            if !audio.is_empty() {
                let _ = self
                    .store
                    .write(
                        &keys::page(&storage_key, ArtifactKind::Audio, page_number),
                        &audio,
                        ArtifactKind::Audio.content_type(),
                    )
                    .await;
            }

            let page_event = IngestEvent::Page {
                page_data: PagePayload {
                    page_number,
                    image: STANDARD.encode(&jpeg),
                    explanation,
                    audio: STANDARD.encode(&audio),
                    audio_url: format!("/pdf/{storage_key}/audio/{page_number}"),
                    image_url: format!("/pdf/{storage_key}/image/{page_number}"),
                },
            };
            if tx.send(page_event).is_err() {
                info!("consumer disconnected; stopping after page {page_number}");
                return;
            }
        }

        // COMPLETE: scratch cleanup, then the final event.
        if let Err(e) = scratch.close() {
            warn!(error = %e, "scratch cleanup failed");
        }
        let _ = tx.send(IngestEvent::Complete {
            pdf_name: storage_key,
        });
    }
}

/// Progress accounting: the first 30% covers upload/hash/rasterise setup,
/// the last 5% cleanup, and the 65% between is spread linearly over pages.
pub fn progress_percent(page_number: usize, page_count: usize) -> u32 {
    debug_assert!(page_count > 0);
    30 + ((page_number as u32 - 1) * 65) / page_count.max(1) as u32
}

/// Display title of an upload: the filename without its extension.
fn display_title(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reserves_setup_and_cleanup_bands() {
        // 3 pages: 30, 51, 73 — the worked example from the API contract.
        assert_eq!(progress_percent(1, 3), 30);
        assert_eq!(progress_percent(2, 3), 51);
        assert_eq!(progress_percent(3, 3), 73);
        // Single page starts and stays at the floor.
        assert_eq!(progress_percent(1, 1), 30);
        // Last page of a long document stays under 95.
        assert_eq!(progress_percent(100, 100), 30 + (99 * 65) / 100);
        assert!(progress_percent(100, 100) < 95);
    }

    #[test]
    fn display_title_strips_extension_only() {
        assert_eq!(display_title("Calc Notes.pdf"), "Calc Notes");
        assert_eq!(display_title("archive.tar.pdf"), "archive.tar");
        assert_eq!(display_title("noext"), "noext");
    }

    #[test]
    fn events_serialise_to_wire_shapes() {
        let info = IngestEvent::Info {
            total_pages: 3,
            pdf_name: "notes_1700000000".into(),
        };
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"type":"info","total_pages":3,"pdf_name":"notes_1700000000"}"#
        );

        let progress = IngestEvent::Progress {
            progress: 51,
            page: 2,
            total_pages: 3,
        };
        assert_eq!(
            serde_json::to_string(&progress).unwrap(),
            r#"{"type":"progress","progress":51,"page":2,"total_pages":3}"#
        );

        let existing = IngestEvent::Existing {
            pdf_name: "notes_1700000000".into(),
        };
        assert_eq!(
            serde_json::to_string(&existing).unwrap(),
            r#"{"type":"existing","pdf_name":"notes_1700000000"}"#
        );

        let error = IngestEvent::Error {
            error: "boom".into(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"type":"error","error":"boom"}"#
        );
    }

    #[test]
    fn page_payload_field_names_match_contract() {
        let payload = PagePayload {
            page_number: 1,
            image: "aW1n".into(),
            explanation: "text".into(),
            audio: String::new(),
            audio_url: "/pdf/k/audio/1".into(),
            image_url: "/pdf/k/image/1".into(),
        };
        let json = serde_json::to_value(IngestEvent::Page { page_data: payload }).unwrap();
        assert_eq!(json["type"], "page");
        let page = &json["page_data"];
        for field in [
            "page_number",
            "image",
            "explanation",
            "audio",
            "audio_url",
            "image_url",
        ] {
            assert!(page.get(field).is_some(), "missing field {field}");
        }
    }
}
