//! Quiz data model and repair-then-validate parsing of model output.
//!
//! This is the one place in the system where unvalidated free text from a
//! generative model becomes structured data, so the repair-and-validate path
//! is an isolated set of pure functions with exhaustive tests:
//!
//! 1. [`extract_json_payload`] — peel markdown code fences and repair
//!    trailing commas (the two malformations models actually produce)
//! 2. [`parse_quiz`] — `serde_json` parse plus shape validation: a list of
//!    objects, four options each, answer letter in A–D
//!
//! Anything that fails both passes is a structured error, never a
//! partially-shaped result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::LecternError;

/// One multiple-choice question. Field names are the wire contract
/// (`correctAnswer` included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

static RE_TRAILING_COMMA_OBJ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\}").expect("valid regex"));
static RE_TRAILING_COMMA_ARR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("valid regex"));

/// Extract the JSON body from raw model output.
///
/// Handles the payload being wrapped in ```` ```json ```` or bare ```` ``` ````
/// fences, and repairs trailing commas before `}` / `]`. Pure text surgery —
/// no parsing happens here.
pub fn extract_json_payload(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.split_once("```json").map(|(_, rest)| rest) {
        text = rest.split("```").next().unwrap_or(rest).trim();
    } else if let Some(rest) = text.split_once("```").map(|(_, rest)| rest) {
        text = rest.split("```").next().unwrap_or(rest).trim();
    }

    let repaired = RE_TRAILING_COMMA_OBJ.replace_all(text, "}");
    RE_TRAILING_COMMA_ARR.replace_all(&repaired, "]").to_string()
}

/// Parse and validate raw model output into quiz questions.
///
/// Validation is structural, not semantic: the payload must be a non-empty
/// array of objects, each carrying a non-empty `question`, exactly four
/// `options`, and a `correctAnswer` in {A, B, C, D}.
pub fn parse_quiz(raw: &str) -> Result<Vec<QuizQuestion>, LecternError> {
    let payload = extract_json_payload(raw);

    let questions: Vec<QuizQuestion> =
        serde_json::from_str(&payload).map_err(|e| LecternError::QuizMalformed {
            detail: format!("response is not a JSON array of questions: {e}"),
        })?;

    if questions.is_empty() {
        return Err(LecternError::QuizMalformed {
            detail: "response contained no questions".into(),
        });
    }

    for (i, q) in questions.iter().enumerate() {
        if q.question.trim().is_empty() {
            return Err(LecternError::QuizMalformed {
                detail: format!("question {} has empty text", i + 1),
            });
        }
        if q.options.len() != 4 {
            return Err(LecternError::QuizMalformed {
                detail: format!(
                    "question {} has {} options, expected 4",
                    i + 1,
                    q.options.len()
                ),
            });
        }
        if !matches!(q.correct_answer.as_str(), "A" | "B" | "C" | "D") {
            return Err(LecternError::QuizMalformed {
                detail: format!(
                    "question {} has correctAnswer {:?}, expected A–D",
                    i + 1,
                    q.correct_answer
                ),
            });
        }
    }

    Ok(questions)
}
