//! Vision-LLM backend: transcribe a variant image with a multimodal model.
//!
//! The variant is PNG-encoded, base64-wrapped into an
//! [`edgequake_llm::ImageData`] and sent as the only user turn after a
//! transcription prompt. Vision models report no confidence, so every
//! [`Recognition`] from this backend has `confidence: None` and competes in
//! selection on text length alone.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. The backend retries
//! with exponential backoff (`retry_backoff_ms * 2^attempt`) before giving up;
//! once it gives up, the orchestrator aborts the run.

use super::{normalize_hint, BackendCapabilities, Recognition, RecognitionBackend};
use crate::error::BackendError;
use crate::variants::{CONTRAST, GRAYSCALE, ORIGINAL};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Base transcription prompt; the language line is appended per run.
pub const TRANSCRIPTION_PROMPT: &str = r#"You are a precise OCR engine. Transcribe ALL text visible in the image.

Rules:
- Preserve the reading order and line breaks of the original
- Preserve diacritics and punctuation exactly
- Do NOT translate, summarise, or correct the text
- Do NOT describe images, layout, or formatting
- Output ONLY the transcribed text, with no commentary
- If the image contains no text, output nothing"#;

/// Request tuning for the vision backend.
#[derive(Debug, Clone)]
pub struct VisionOptions {
    /// Low temperature keeps the model faithful to the page. Default: 0.0.
    pub temperature: f32,
    /// Maximum tokens per variant. Default: 4096.
    pub max_tokens: usize,
    /// Retries on a failed provider call. Default: 3.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,
    /// Language assumed when the run gives no hint. Default: `None` (auto).
    pub default_language: Option<String>,
}

impl Default for VisionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            default_language: None,
        }
    }
}

/// Recognition through a vision-capable LLM provider.
pub struct VisionBackend {
    provider: Arc<dyn LLMProvider>,
    options: VisionOptions,
    language: Option<String>,
}

impl std::fmt::Debug for VisionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionBackend")
            .field("provider", &"<dyn LLMProvider>")
            .field("options", &self.options)
            .field("language", &self.language)
            .finish()
    }
}

impl VisionBackend {
    /// Backend over a shared provider, with the given hint applied.
    pub fn new(provider: Arc<dyn LLMProvider>, options: VisionOptions, hint: Option<&str>) -> Self {
        let mut backend = Self {
            provider,
            options,
            language: None,
        };
        backend.apply_hint(hint);
        backend
    }

    fn apply_hint(&mut self, hint: Option<&str>) {
        self.language = normalize_hint(hint)
            .map(str::to_string)
            .or_else(|| self.options.default_language.clone());
    }

    fn system_prompt(&self) -> String {
        match &self.language {
            Some(lang) => format!(
                "{TRANSCRIPTION_PROMPT}\n- The text is written in: {lang}"
            ),
            None => TRANSCRIPTION_PROMPT.to_string(),
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RecognitionBackend for VisionBackend {
    fn name(&self) -> &str {
        "vision"
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            // Binarisation and median smoothing erase the fine strokes
            // (diacritics, thin serifs) a vision model reads.
            preferred_variants: Some(vec![
                ORIGINAL.to_string(),
                GRAYSCALE.to_string(),
                CONTRAST.to_string(),
            ]),
            configurable_language: true,
        }
    }

    fn set_language(&mut self, hint: Option<&str>) -> Result<(), BackendError> {
        self.apply_hint(hint);
        Ok(())
    }

    async fn identify(&mut self, image: &DynamicImage) -> Result<Recognition, BackendError> {
        let image_data = encode_image(image)?;
        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = self.build_options();

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let backoff = self.options.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "vision: retry {}/{} after {}ms",
                    attempt, self.options.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "vision: {} input tokens, {} output tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(Recognition::new(clean_transcription(&response.content), None));
                }
                Err(e) => {
                    let msg = e.to_string();
                    warn!("vision: attempt {} failed: {}", attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        Err(BackendError::Engine(format!(
            "provider failed after {} retries: {}",
            self.options.max_retries,
            last_err.unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}

/// Encode a variant as a base64 PNG attachment.
///
/// PNG keeps strokes crisp; `detail: "high"` makes tiling providers look at
/// the full-resolution image rather than a 512 px overview.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, BackendError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

static WRAPPING_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A\s*```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*\z").expect("valid regex")
});

/// Strip a code fence wrapping the whole response, then trim.
pub fn clean_transcription(raw: &str) -> String {
    match WRAPPING_FENCE.captures(raw) {
        Some(caps) => caps[1].trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Build a provider by name, or auto-detect one from the environment.
pub fn provider_from_env(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, BackendError> {
    let model = model.unwrap_or("gpt-4.1-nano");
    if let Some(name) = provider_name {
        return ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| BackendError::Unavailable(format!("provider '{name}': {e}")));
    }

    if let (Ok(name), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !env_model.is_empty() {
            return ProviderFactory::create_llm_provider(&name, &env_model)
                .map_err(|e| BackendError::Unavailable(format!("provider '{name}': {e}")));
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return ProviderFactory::create_llm_provider("openai", model)
                .map_err(|e| BackendError::Unavailable(format!("provider 'openai': {e}")));
        }
    }

    let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        BackendError::Unavailable(format!(
            "no vision provider configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY or \
             GEMINI_API_KEY, or pass --vision-provider ({e})"
        ))
    })?;
    Ok(provider)
}
