//! Remote engine: a vision LLM reached through `edgequake-llm`.
//!
//! One page is one chat request carrying the page PNG and the transcription
//! prompt. With `cleanup` a second, text-only request asks the model to fix
//! recognition errors in its own output.
//!
//! ## Error classification
//!
//! [`classify_provider_error`] maps each [`LlmError`] variant onto
//! [`OcrError`]:
//!
//! | `LlmError` | Kind |
//! |------------|------|
//! | `RateLimited` | `RateLimited` |
//! | `AuthError` | `Auth` |
//! | `ConfigError`, `ModelNotFound`, `NotSupported` | `EngineUnavailable` |
//! | `NetworkError`, `Timeout`, `ProviderError`, `Unknown` | `Transient` |
//! | `InvalidRequest`, `TokenLimitExceeded`, `SerializationError` | `InvalidResponse` |
//! | `ApiError` | by the HTTP status it carries (429, 401/403, 5xx, other 4xx) |

use super::{EngineKind, EngineMetadata, OcrBackend, TranscribeOptions, Transcription};
use crate::config::TranscriptionConfig;
use crate::error::{OcrError, TranscribeError};
use crate::pipeline::encode;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Provider used when the config names none.
pub const DEFAULT_PROVIDER: &str = "anthropic";

static RE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").expect("valid regex"));
static RE_OVERLOADED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)overloaded|rate[ _-]?limit|too many requests").expect("valid regex")
});
static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[ _-]after[^0-9]{0,5}(\d+)").expect("valid regex")
});

/// Vision-LLM transcription engine.
pub struct VisionEngine {
    provider: Arc<dyn LLMProvider>,
    provider_name: String,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for VisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionEngine")
            .field("provider", &self.provider_name)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionEngine {
    /// Wrap an already configured provider.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        provider_name: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
            model: model.into(),
            timeout,
        }
    }

    /// Use `config.provider` when set, otherwise build the named provider
    /// (default `anthropic`) for the configured model class.
    ///
    /// The factory reads the provider's API key from the environment; a
    /// missing key is reported as [`TranscribeError::EngineUnavailable`].
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self, TranscribeError> {
        let name = config
            .provider_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let model = config.model_class.model_id();
        let timeout = Duration::from_secs(config.api_timeout_secs);

        if let Some(ref provider) = config.provider {
            return Ok(Self::new(Arc::clone(provider), name, model, timeout));
        }

        let provider = ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
            TranscribeError::EngineUnavailable {
                engine: name.clone(),
                detail: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, name, model, timeout))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<(String, usize, usize), OcrError> {
        let response = tokio::time::timeout(self.timeout, self.provider.chat(messages, Some(options)))
            .await
            .map_err(|_| {
                OcrError::Transient(format!("no response within {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| classify_provider_error(&e))?;
        Ok((
            response.content,
            response.prompt_tokens as usize,
            response.completion_tokens as usize,
        ))
    }
}

#[async_trait]
impl OcrBackend for VisionEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Remote
    }

    fn name(&self) -> String {
        format!("{} vision ({})", self.provider_name, self.model)
    }

    async fn transcribe(
        &self,
        image: &DynamicImage,
        options: &TranscribeOptions,
    ) -> Result<Transcription, OcrError> {
        let start = Instant::now();
        let image_data = encode::encode_page(image)
            .map_err(|e| OcrError::RecognitionFailed(format!("PNG encoding failed: {e}")))?;

        let completion = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            ..Default::default()
        };

        let prompt = prompts::ocr_prompt(&options.language, options.reflow);
        let messages = vec![ChatMessage::user_with_images(&prompt, vec![image_data])];
        let (text, mut input_tokens, mut output_tokens) = self.chat(&messages, &completion).await?;

        if text.trim().is_empty() {
            return Err(OcrError::InvalidResponse("provider returned no text".into()));
        }
        debug!(input_tokens, output_tokens, "page transcribed");

        let mut cleaned = None;
        if options.cleanup {
            let cleanup = prompts::cleanup_prompt(&text, &options.language);
            let messages = vec![ChatMessage::user(&cleanup)];
            let (fixed, i, o) = self.chat(&messages, &completion).await?;
            input_tokens += i;
            output_tokens += o;
            if fixed.trim().is_empty() {
                warn!("cleanup pass returned no text; keeping the raw transcription only");
            } else {
                cleaned = Some(fixed);
            }
        }

        Ok(Transcription {
            text,
            cleaned,
            metadata: EngineMetadata {
                engine: self.name(),
                model: Some(self.model.clone()),
                rotation: 0,
                input_tokens,
                output_tokens,
                duration_ms: start.elapsed().as_millis() as u64,
            },
        })
    }
}

/// Map a provider error onto the backend failure taxonomy.
pub fn classify_provider_error(err: &LlmError) -> OcrError {
    let detail = err.to_string();
    match err {
        LlmError::RateLimited(msg) => OcrError::RateLimited {
            retry_after: retry_after_hint(msg),
        },
        LlmError::AuthError(_) => OcrError::Auth(detail),
        LlmError::ConfigError(_) | LlmError::ModelNotFound(_) | LlmError::NotSupported(_) => {
            OcrError::EngineUnavailable(detail)
        }
        LlmError::NetworkError(_)
        | LlmError::Timeout
        | LlmError::ProviderError(_)
        | LlmError::Unknown(_) => OcrError::Transient(detail),
        LlmError::InvalidRequest(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::SerializationError(_) => OcrError::InvalidResponse(detail),
        LlmError::ApiError(msg) => classify_api_status(msg, detail),
    }
}

/// `ApiError` only carries the provider's message; split it on the status code.
fn classify_api_status(msg: &str, detail: String) -> OcrError {
    let status = RE_STATUS
        .captures(msg)
        .and_then(|c| c[1].parse::<u16>().ok());
    match status {
        Some(429) => OcrError::RateLimited {
            retry_after: retry_after_hint(msg),
        },
        Some(401) | Some(403) => OcrError::Auth(detail),
        Some(s) if s >= 500 => OcrError::Transient(detail),
        Some(_) => OcrError::InvalidResponse(detail),
        None if RE_OVERLOADED.is_match(msg) => OcrError::RateLimited {
            retry_after: retry_after_hint(msg),
        },
        None => OcrError::Transient(detail),
    }
}

fn retry_after_hint(msg: &str) -> Option<Duration> {
    RE_RETRY_AFTER
        .captures(msg)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_with_hint() {
        let e = classify_provider_error(&LlmError::RateLimited("slow down, retry-after: 12".into()));
        match e {
            OcrError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify_provider_error(&LlmError::RateLimited("rate_limit_error".into())),
            OcrError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn credential_and_config_failures_are_fatal() {
        let errors = [
            LlmError::AuthError("invalid x-api-key".into()),
            LlmError::ConfigError("ANTHROPIC_API_KEY not set".into()),
            LlmError::ModelNotFound("claude-nope".into()),
            LlmError::NotSupported("vision".into()),
            LlmError::ApiError("403 Forbidden".into()),
        ];
        for err in errors {
            let e = classify_provider_error(&err);
            assert!(e.is_fatal(), "{err} -> {e:?}");
            assert!(!e.is_retryable(), "{err} -> {e:?}");
        }
        assert!(matches!(
            classify_provider_error(&LlmError::AuthError("bad key".into())),
            OcrError::Auth(_)
        ));
        assert!(matches!(
            classify_provider_error(&LlmError::ConfigError("ANTHROPIC_API_KEY not set".into())),
            OcrError::EngineUnavailable(_)
        ));
    }

    #[test]
    fn rejected_requests_are_not_retried() {
        let errors = [
            LlmError::InvalidRequest("image exceeds 5 MB maximum".into()),
            LlmError::TokenLimitExceeded { max: 4096, got: 9000 },
            LlmError::ApiError("400 Bad Request: image too large".into()),
        ];
        for err in errors {
            let e = classify_provider_error(&err);
            assert!(matches!(e, OcrError::InvalidResponse(_)), "{err} -> {e:?}");
            assert!(!e.is_retryable());
            assert!(!e.is_fatal());
        }
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!classify_provider_error(&LlmError::SerializationError(json)).is_retryable());
    }

    #[test]
    fn network_and_server_side_are_transient() {
        let errors = [
            LlmError::NetworkError("connection reset by peer".into()),
            LlmError::Timeout,
            LlmError::ProviderError("upstream hiccup".into()),
            LlmError::ApiError("500 Internal Server Error".into()),
            LlmError::ApiError("something odd happened".into()),
            LlmError::Unknown("?".into()),
        ];
        for err in errors {
            let e = classify_provider_error(&err);
            assert!(matches!(e, OcrError::Transient(_)), "{err} -> {e:?}");
        }
    }

    #[test]
    fn api_error_status_is_honoured() {
        assert!(matches!(
            classify_provider_error(&LlmError::ApiError("429 Too Many Requests, retry-after: 3".into())),
            OcrError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            classify_provider_error(&LlmError::ApiError("overloaded_error".into())),
            OcrError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_provider_error(&LlmError::ApiError("401 Unauthorized".into())),
            OcrError::Auth(_)
        ));
    }
}
