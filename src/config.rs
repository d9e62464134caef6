//! Service configuration.
//!
//! Everything that varies per deployment comes in through environment
//! variables, collected once at startup into [`AppConfig`] and passed down to
//! the services explicitly. Nothing in the library reads the environment
//! after construction; that keeps init order visible and lets tests build a
//! config literal instead of mutating process globals.
//!
//! Degradation policy at startup:
//! * missing object-store credentials → local-only mode (warning, not an error)
//! * missing vision-LLM API key → hard failure (the service cannot explain pages)

use std::path::PathBuf;

/// Deployment-level configuration, read from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// TCP port for the HTTP listener. `LECTERN_PORT`, default 5000.
    pub port: u16,

    /// Root directory for the local storage tier and the catalog database.
    /// `LECTERN_DATA_DIR`, default `./data`.
    pub data_dir: PathBuf,

    /// Remote bucket name. `LECTERN_BUCKET`, default `lectern-artifacts`.
    pub bucket: String,

    /// Remote bucket region. `LECTERN_S3_REGION` (falls back to `AWS_REGION`),
    /// default `us-east-1`.
    pub region: String,

    /// Custom S3-compatible endpoint (MinIO, LocalStack). `LECTERN_S3_ENDPOINT`.
    pub endpoint_url: Option<String>,

    /// Speech-synthesis API key. `LECTERN_TTS_API_KEY`, falling back to
    /// `GOOGLE_API_KEY` since the reference deployment shares one key.
    pub tts_api_key: Option<String>,

    /// Voice configuration forwarded to the synthesis request.
    /// `LECTERN_TTS_LANGUAGE` / `LECTERN_TTS_VOICE`.
    pub tts_language: String,
    pub tts_voice: String,

    /// Longest edge of a rasterised page image, in pixels. Caps memory for
    /// oversized pages regardless of their physical size. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Lifetime of issued direct-access URLs, in seconds. Default: 1800.
    pub url_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            data_dir: PathBuf::from("data"),
            bucket: "lectern-artifacts".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            tts_api_key: None,
            tts_language: "en-IN".to_string(),
            tts_voice: "en-IN-Chirp3-HD-Achernar".to_string(),
            max_rendered_pixels: 2000,
            url_ttl_secs: 1800,
        }
    }
}

impl AppConfig {
    /// Build a config from the process environment, filling in defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parsed("LECTERN_PORT").unwrap_or(defaults.port),
            data_dir: std::env::var("LECTERN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            bucket: env_nonempty("LECTERN_BUCKET").unwrap_or(defaults.bucket),
            region: env_nonempty("LECTERN_S3_REGION")
                .or_else(|| env_nonempty("AWS_REGION"))
                .unwrap_or(defaults.region),
            endpoint_url: env_nonempty("LECTERN_S3_ENDPOINT"),
            tts_api_key: env_nonempty("LECTERN_TTS_API_KEY")
                .or_else(|| env_nonempty("GOOGLE_API_KEY")),
            tts_language: env_nonempty("LECTERN_TTS_LANGUAGE").unwrap_or(defaults.tts_language),
            tts_voice: env_nonempty("LECTERN_TTS_VOICE").unwrap_or(defaults.tts_voice),
            max_rendered_pixels: env_parsed("LECTERN_MAX_PIXELS")
                .unwrap_or(defaults.max_rendered_pixels),
            url_ttl_secs: env_parsed("LECTERN_URL_TTL_SECS").unwrap_or(defaults.url_ttl_secs),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Per-request processing options supplied by the uploader.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Verbosity/difficulty hint forwarded to the explanation prompt,
    /// e.g. "simple terms" or "detailed".
    pub difficulty: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            difficulty: "detailed".to_string(),
        }
    }
}
