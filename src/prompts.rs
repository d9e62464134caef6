//! Prompt templates for the vision-LLM capabilities.
//!
//! Centralising every prompt here keeps behaviour changes to one file and
//! lets unit tests inspect prompt construction without a live model.

/// Build the per-page explanation prompt.
///
/// `difficulty` is the caller-supplied verbosity/difficulty setting, spliced
/// into the instruction verbatim (e.g. "simple terms", "detailed"). The
/// pause-punctuation and no-special-characters instructions exist because
/// the output is narrated as-is by the speech synthesiser.
pub fn explain_page(difficulty: &str) -> String {
    format!(
        "Please explain this page in {difficulty}, including any formulas or \
         mathematical expressions. Make sure to explain them in a way that would \
         be easy to read aloud. Give a '.' after a long pause and a ';' after a \
         medium pause based on the importance of the words. Preserve all \
         formatting, including paragraph breaks. Do not use any subscript \
         symbols or special characters; read them aloud instead. Do not repeat \
         content from the previous page or useless information in headers and \
         footers."
    )
}

/// Prompt for re-deriving a page summary from its image when no stored
/// explanation text exists (quiz-generation fallback).
pub const SUMMARIZE_PAGE: &str = "Provide a comprehensive summary of the key \
concepts on this page that would be useful for quiz generation.";

/// Build the primary quiz prompt: five four-option multiple-choice questions
/// as a bare JSON array.
pub fn quiz_primary(content: &str) -> String {
    format!(
        r#"Based on the following content, generate a quiz with 5 multiple-choice questions to test understanding.
For each question, provide:
1. The question text
2. Four possible answers (A, B, C, D)
3. The correct answer letter
4. A brief explanation of why that's the correct answer

Format the output exactly as a JSON array of objects with the following structure:
[
  {{
    "question": "Question text here",
    "options": ["Option A", "Option B", "Option C", "Option D"],
    "correctAnswer": "A",
    "explanation": "Explanation of why A is correct"
  }},
  ...
]

Make sure to provide 5 questions and use the EXACT format above. Return ONLY valid JSON data, nothing else.

Content:
{content}"#
    )
}

/// Build the question-answering prompt over collected page explanations.
pub fn answer_question(context: &str, question: &str) -> String {
    format!(
        "# Context: {context}\n\n\
         # Question: {question}\n\n\
         # Answer the question based on the provided context. Be comprehensive and accurate.\n\
         # If the answer is not in the context, say \"I don't have enough information to answer this question accurately.\"\n\
         # Don't be afraid to give detailed technical explanations if the question asks for them.\n\
         # Avoid starting with phrases like \"Think and Response\" or similar templates.\n\
         # Always cite page numbers if you know them."
    )
}

/// Build the simplified retry prompt used after the primary response failed
/// shape validation: fewer questions, terser instructions.
pub fn quiz_simplified(content: &str) -> String {
    format!(
        "Generate a JSON array of 3 quiz questions about the following content. \
         Each question should have a 'question' field, an 'options' array with 4 \
         choices, a 'correctAnswer' field with the letter (A, B, C or D), and an \
         'explanation' field. Return ONLY valid JSON, nothing else.\n\n\
         Content:\n{content}"
    )
}
