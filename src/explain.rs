//! The explanation capability: a vision LLM that reads page images.
//!
//! [`Explainer`] is the seam between the pipeline and the model: production
//! code uses [`VlmExplainer`] over an `edgequake-llm` provider, tests inject
//! a fake. The trait is intentionally narrow — three ways of asking the
//! model for text — so fakes stay one screen long.
//!
//! No retry, no timeout lives here. A failed call is returned to the caller,
//! which degrades the affected page (ingestion) or reports the failure
//! (quiz generation). The only retry in the whole system is the
//! simplified-prompt quiz retry, orchestrated above this layer.

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

use crate::error::LecternError;
use crate::prompts;

/// Access to the generative model, narrowed to this system's three asks.
#[async_trait]
pub trait Explainer: Send + Sync {
    /// Explain one page image at the requested difficulty; returns Markdown.
    async fn explain_page(
        &self,
        image: &ImageData,
        difficulty: &str,
    ) -> Result<String, LecternError>;

    /// Summarise a page image for quiz generation (fallback when no stored
    /// explanation text exists).
    async fn summarize_page(&self, image: &ImageData) -> Result<String, LecternError>;

    /// Draft a quiz from concatenated explanation text. Returns the model's
    /// raw text; JSON extraction and validation happen in [`crate::quiz`].
    async fn draft_quiz(
        &self,
        content: &str,
        question_count: usize,
    ) -> Result<String, LecternError>;

    /// Answer a free-form question against collected explanation context.
    async fn answer_question(
        &self,
        context: &str,
        question: &str,
    ) -> Result<String, LecternError>;
}

/// Production [`Explainer`] backed by an `edgequake-llm` vision provider.
pub struct VlmExplainer {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl VlmExplainer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            temperature: 0.7,
            max_tokens: 8192,
        }
    }

    /// Resolve a provider from the environment.
    ///
    /// Honours `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are
    /// set, otherwise falls back to the factory's API-key auto-detection.
    /// No resolvable provider is a hard startup failure: the service cannot
    /// explain pages without a model.
    pub fn from_env() -> Result<Self, LecternError> {
        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                let provider = ProviderFactory::create_llm_provider(&prov, &model).map_err(|e| {
                    LecternError::ExplainerNotConfigured {
                        hint: format!("{e}"),
                    }
                })?;
                return Ok(Self::new(provider));
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| LecternError::ExplainerNotConfigured {
                hint: format!(
                    "no vision-LLM provider auto-detected from environment; \
                     set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY ({e})"
                ),
            })?;
        Ok(Self::new(provider))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LecternError> {
        let response = self
            .provider
            .chat(messages, Some(&self.options()))
            .await
            .map_err(|e| LecternError::ExplainFailed {
                detail: format!("{e}"),
            })?;
        debug!(
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "model call complete"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl Explainer for VlmExplainer {
    async fn explain_page(
        &self,
        image: &ImageData,
        difficulty: &str,
    ) -> Result<String, LecternError> {
        let messages = vec![ChatMessage::user_with_images(
            prompts::explain_page(difficulty),
            vec![image.clone()],
        )];
        self.chat(&messages).await
    }

    async fn summarize_page(&self, image: &ImageData) -> Result<String, LecternError> {
        let messages = vec![ChatMessage::user_with_images(
            prompts::SUMMARIZE_PAGE,
            vec![image.clone()],
        )];
        self.chat(&messages).await
    }

    async fn draft_quiz(
        &self,
        content: &str,
        question_count: usize,
    ) -> Result<String, LecternError> {
        let prompt = if question_count <= 3 {
            prompts::quiz_simplified(content)
        } else {
            prompts::quiz_primary(content)
        };
        let messages = vec![ChatMessage::user(prompt)];
        self.chat(&messages).await
    }

    async fn answer_question(
        &self,
        context: &str,
        question: &str,
    ) -> Result<String, LecternError> {
        let messages = vec![ChatMessage::user(prompts::answer_question(context, question))];
        self.chat(&messages).await
    }
}
