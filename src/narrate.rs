//! The narration capability: text → spoken audio (MP3).
//!
//! [`Narrator`] is the injectable seam; [`SpeechSynthesizer`] is the
//! production implementation, a thin `reqwest` client for a REST
//! text-to-speech endpoint that takes a JSON request and returns base64
//! audio in an `audioContent` field.
//!
//! Explanation text is written for display (Markdown); narration wants the
//! same words without the markup. [`prepare_speech_text`] does that
//! adaptation: emphasis markers are stripped, overlong text is truncated to
//! the synthesiser's input limit, and an empty result is replaced with a
//! spoken placeholder so a narration request is never sent empty.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::error::LecternError;

/// Character cap respected before calling the synthesiser.
const SPEECH_CHAR_LIMIT: usize = 5000;

const TRUNCATION_NOTICE: &str =
    "... The rest of the content has been truncated for processing.";

/// Access to the speech synthesiser.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Synthesise speech for already-sanitised text; returns MP3 bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, LecternError>;
}

/// Voice parameters forwarded with each synthesis request.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub language_code: String,
    pub voice_name: String,
    pub speaking_rate: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language_code: "en-IN".to_string(),
            voice_name: "en-IN-Chirp3-HD-Achernar".to_string(),
            speaking_rate: 1.0,
        }
    }
}

/// REST text-to-speech client.
#[derive(Debug)]
pub struct SpeechSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: VoiceSettings,
}

impl SpeechSynthesizer {
    const DEFAULT_ENDPOINT: &'static str =
        "https://texttospeech.googleapis.com/v1/text:synthesize";

    /// Build a synthesiser; `api_key: None` is a hard configuration error.
    pub fn new(api_key: Option<String>, voice: VoiceSettings) -> Result<Self, LecternError> {
        let api_key = api_key.ok_or(LecternError::NarratorNotConfigured)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: std::env::var("LECTERN_TTS_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            api_key,
            voice,
        })
    }
}

#[async_trait]
impl Narrator for SpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, LecternError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let payload = json!({
            "input": { "text": text },
            "voice": {
                "languageCode": self.voice.language_code,
                "name": self.voice.voice_name,
                "ssmlGender": "NEUTRAL",
            },
            "audioConfig": {
                "audioEncoding": "MP3",
                "speakingRate": self.voice.speaking_rate,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LecternError::NarrateFailed {
                detail: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LecternError::NarrateFailed {
                detail: format!("HTTP {status}: {}", body.chars().take(300).collect::<String>()),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| LecternError::NarrateFailed {
                detail: format!("malformed response body: {e}"),
            })?;
        let audio_b64 = body
            .get("audioContent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LecternError::NarrateFailed {
                detail: "no audioContent in response".to_string(),
            })?;

        let audio = STANDARD
            .decode(audio_b64)
            .map_err(|e| LecternError::NarrateFailed {
                detail: format!("audioContent is not valid base64: {e}"),
            })?;
        if audio.is_empty() {
            return Err(LecternError::NarrateFailed {
                detail: "synthesiser returned empty audio".to_string(),
            });
        }

        debug!(bytes = audio.len(), "speech synthesised");
        Ok(audio)
    }
}

// ── Text preparation ─────────────────────────────────────────────────────

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));

/// Adapt a page explanation for narration.
///
/// 1. `**bold**` markers are unwrapped and stray `*` removed — the words
///    stay, the markup goes.
/// 2. Text that ends up empty becomes a spoken placeholder naming the page.
/// 3. Text over [`SPEECH_CHAR_LIMIT`] characters is cut at the limit with a
///    spoken truncation notice appended.
pub fn prepare_speech_text(explanation: &str, page_number: usize) -> String {
    let stripped = RE_BOLD.replace_all(explanation, "$1").replace('*', "");

    if stripped.trim().is_empty() {
        return format!("Page {page_number} content could not be processed properly.");
    }

    if stripped.chars().count() > SPEECH_CHAR_LIMIT {
        let mut cut: String = stripped.chars().take(SPEECH_CHAR_LIMIT).collect();
        cut.push_str(TRUNCATION_NOTICE);
        return cut;
    }

    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_emphasis_markers_but_keeps_words() {
        let out = prepare_speech_text("This is **very** important, *really*.", 1);
        assert_eq!(out, "This is very important, really.");
    }

    #[test]
    fn empty_text_becomes_placeholder() {
        let out = prepare_speech_text("  **** * ", 7);
        assert_eq!(out, "Page 7 content could not be processed properly.");
    }

    #[test]
    fn long_text_is_truncated_with_notice() {
        let long = "a".repeat(SPEECH_CHAR_LIMIT + 500);
        let out = prepare_speech_text(&long, 1);
        assert!(out.starts_with(&"a".repeat(100)));
        assert!(out.ends_with(TRUNCATION_NOTICE));
        assert_eq!(
            out.chars().count(),
            SPEECH_CHAR_LIMIT + TRUNCATION_NOTICE.chars().count()
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Multi-byte characters must not be split mid-codepoint.
        let long = "é".repeat(SPEECH_CHAR_LIMIT + 10);
        let out = prepare_speech_text(&long, 1);
        assert!(out.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn short_text_passes_through() {
        assert_eq!(prepare_speech_text("Plain text.", 1), "Plain text.");
    }

    #[test]
    fn missing_api_key_is_configuration_error() {
        let err = SpeechSynthesizer::new(None, VoiceSettings::default()).unwrap_err();
        assert!(matches!(err, LecternError::NarratorNotConfigured));
    }
}
