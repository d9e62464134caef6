//! Error types for the lectern library.
//!
//! A single [`LecternError`] covers the fatal failure modes: the caller's
//! request cannot proceed at all (bad upload, unreadable PDF, capability not
//! configured). Capability failures during page processing — explanation or
//! narration errors — are deliberately *not* propagated out of the ingestion
//! loop: the pipeline degrades the affected page to placeholder content and
//! keeps going, so one bad page never costs the rest of the document. Those
//! degraded outcomes surface only in logs and in the placeholder text itself.

use thiserror::Error;

/// All fatal errors returned by the lectern library.
#[derive(Debug, Error)]
pub enum LecternError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes do not start with the PDF magic number.
    #[error("file is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The PDF could not be opened or parsed by the rasteriser.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// A specific page could not be rendered to an image.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterizationFailed { page: usize, detail: String },

    /// Request-level validation failure (missing field, wrong extension).
    #[error("invalid request: {0}")]
    InvalidInput(String),

    // ── Capability errors ─────────────────────────────────────────────────
    /// No vision-LLM provider could be resolved (missing API key etc.).
    /// This is a startup-time hard failure.
    #[error("explanation model is not configured: {hint}")]
    ExplainerNotConfigured { hint: String },

    /// A single explanation call failed. Degraded to placeholder text by
    /// the ingestion loop; fatal only when retrieval has nothing to fall
    /// back on.
    #[error("explanation request failed: {detail}")]
    ExplainFailed { detail: String },

    /// The speech-synthesis service is not configured (missing API key).
    #[error("narration service is not configured: set LECTERN_TTS_API_KEY")]
    NarratorNotConfigured,

    /// A single narration call failed. Degraded to empty audio during
    /// ingestion; fatal only for on-demand regeneration with no other tier.
    #[error("narration request failed: {detail}")]
    NarrateFailed { detail: String },

    // ── Catalog errors ────────────────────────────────────────────────────
    /// The SQLite catalog rejected or failed a query.
    #[error("catalog query failed: {0}")]
    Catalog(#[from] sqlx::Error),

    // ── Quiz errors ───────────────────────────────────────────────────────
    /// No explanation text and no page images exist for the storage key,
    /// so there is nothing to build a quiz from.
    #[error("no content found to generate quiz")]
    QuizNoContent,

    /// Both the primary and the simplified quiz prompt produced output
    /// that failed shape validation.
    #[error("failed to generate valid quiz format: {detail}")]
    QuizMalformed { detail: String },

    // ── Not found ─────────────────────────────────────────────────────────
    /// The storage key (or the page under it) does not exist in any tier.
    #[error("not found: {0}")]
    NotFound(String),

    // ── I/O ───────────────────────────────────────────────────────────────
    /// Local filesystem failure outside the best-effort store paths.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LecternError {
    /// True for errors that map to a 404 at the HTTP boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LecternError::NotFound(_) | LecternError::QuizNoContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_pdf_display_includes_magic() {
        let e = LecternError::NotAPdf {
            magic: [0x50, 0x4b, 0x03, 0x04],
        };
        assert!(e.to_string().contains("not a valid PDF"));
    }

    #[test]
    fn rasterization_display_includes_page() {
        let e = LecternError::RasterizationFailed {
            page: 4,
            detail: "bad xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4"), "got: {msg}");
        assert!(msg.contains("bad xref"));
    }

    #[test]
    fn not_found_classification() {
        assert!(LecternError::NotFound("x".into()).is_not_found());
        assert!(LecternError::QuizNoContent.is_not_found());
        assert!(!LecternError::Internal("x".into()).is_not_found());
    }
}
