//! # lectern
//!
//! Turn a PDF into narrated study material: every page is rasterised, read
//! by a vision LLM, explained in plain language, and spoken aloud by a
//! text-to-speech service — with the whole artifact set deduplicated by
//! content hash so a PDF is only ever processed once, no matter how many
//! people upload it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Hash     SHA-256 over the byte stream → dedup key
//!  ├─ 2. Dedup    known hash? link user to existing record, stop
//!  ├─ 3. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Explain  vision-LLM explanation per page, difficulty-tuned
//!  ├─ 5. Narrate  sanitise for speech, synthesise MP3
//!  ├─ 6. Persist  image/text/audio to local + remote storage tiers
//!  └─ 7. Stream   typed progress events per page, as they complete
//! ```
//!
//! ## Storage model
//!
//! Artifacts live in a two-tier [`store::ContentStore`]: the local
//! filesystem (always on) and an optional S3-compatible bucket. Reads prefer
//! the remote tier and opportunistically promote local-only hits upward;
//! retrieval self-heals missing audio by re-synthesising it from the stored
//! explanation text. The [`catalog::Catalog`] (SQLite) records which
//! distinct PDFs exist and which users reference them.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lectern::{config::AppConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / …
//!     let config = AppConfig::from_env();
//!     let state = server::AppState::from_config(&config).await?;
//!     server::serve(state, config.port).await?;
//!     Ok(())
//! }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod explain;
pub mod hash;
pub mod narrate;
pub mod pipeline;
pub mod prompts;
pub mod quiz;
pub mod retrieval;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{Catalog, PdfRecord};
pub use config::{AppConfig, IngestOptions};
pub use error::LecternError;
pub use explain::{Explainer, VlmExplainer};
pub use narrate::{Narrator, SpeechSynthesizer};
pub use pipeline::{IngestEvent, IngestOutcome, IngestPipeline, Rasterizer, UploadedPdf};
pub use quiz::QuizQuestion;
pub use retrieval::RetrievalService;
pub use store::{ContentStore, RemoteTier};
