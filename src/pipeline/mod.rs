//! Pipeline stages for PDF-to-study-material ingestion.
//!
//! ## Data flow
//!
//! ```text
//! upload ──▶ hash/dedup ──▶ render ──▶ encode ──▶ explain ──▶ narrate ──▶ store
//!            (catalog)     (pdfium)   (JPEG)     (VLM)       (TTS)       (two tiers)
//! ```
//!
//! 1. [`render`] — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 2. [`encode`] — JPEG-encode each page once, for storage, transport, and
//!    the vision request alike
//! 3. [`ingest`] — the orchestrating state machine and its event stream

pub mod encode;
pub mod ingest;
pub mod render;

pub use ingest::{IngestEvent, IngestOutcome, IngestPipeline, IngestStream, PagePayload, UploadedPdf};
pub use render::{PdfiumRasterizer, Rasterizer};
